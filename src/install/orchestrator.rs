//! Debugger side of sideloading.
//!
//! ```text
//! install_app
//!   |-- partial supported? -- pull app.contents listing -- diff --+-- no-op: Ok(None)
//!   |                                  (any failure: full bundle) |
//!   v                                                             v
//! app.install.stream.begin -> io.write x N (concurrent) -> app.install.stream.finalize
//!                                  |
//!                                  +-- failure: app.install.stream.abort (detached)
//! ```

use crate::bundle::{make_partial_bundle, Bundle, ContentListing};
use crate::capabilities::Capabilities;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, InstallPhase, Result};
use crate::install::{ComponentKind, InstallResult};
use crate::rpc::{BeginInstallParams, Call, ContentQuery, Peer, StreamParams, TransferKind};
use crate::transfer::{max_chunk_size, BulkReceiver, ChunkSender, Token};
use bytes::Bytes;
use std::sync::Arc;

/// Called with `(bytes_written, total_bytes)` as chunks are acknowledged.
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

#[derive(Default)]
pub struct InstallOptions {
    pub on_progress: Option<ProgressCallback>,
}

impl InstallOptions {
    pub fn with_progress(on_progress: impl FnMut(u64, u64) + Send + 'static) -> Self {
        Self {
            on_progress: Some(Box::new(on_progress)),
        }
    }
}

pub struct InstallOrchestrator {
    peer: Arc<dyn Peer>,
    capabilities: Capabilities,
    config: BridgeConfig,
    bulk: BulkReceiver,
}

impl InstallOrchestrator {
    /// `bulk` must be the receiver whose table is fed by this connection's
    /// inbound `app.contents.stream.*` signals.
    pub fn new(
        peer: Arc<dyn Peer>,
        capabilities: Capabilities,
        config: BridgeConfig,
        bulk: BulkReceiver,
    ) -> Self {
        Self {
            peer,
            capabilities,
            config,
            bulk,
        }
    }

    /// Install a bundle on the peer.
    ///
    /// Resolves to `Ok(None)` when the peer already has exactly this content.
    pub async fn install_app(
        &self,
        kind: ComponentKind,
        data: Bytes,
        options: InstallOptions,
    ) -> Result<Option<InstallResult>> {
        if !self.capabilities.accepts(kind) {
            return Err(BridgeError::Unsupported(format!("sideloading {} bundles", kind)));
        }
        let protocol = &self.capabilities.protocol;
        let chunk_size = max_chunk_size(
            protocol.max_message_size,
            self.config.message_overhead,
            protocol.wire_encoding,
        )?;

        let payload = if self.capabilities.supports_partial() {
            match self.reduce(kind, &data).await {
                Ok(Some(partial)) => {
                    tracing::info!(
                        "Sending partial {} bundle ({} of {} bytes)",
                        kind,
                        partial.len(),
                        data.len()
                    );
                    partial
                }
                Ok(None) => {
                    tracing::info!("Installed {} content is up to date, nothing to install", kind);
                    return Ok(None);
                }
                Err(BridgeError::AlreadyPartial) => {
                    tracing::warn!("Refusing to install {}: bundle is already partial", kind);
                    return Err(BridgeError::AlreadyPartial);
                }
                Err(e) => {
                    tracing::warn!("Partial install not possible, sending full bundle: {}", e);
                    data
                }
            }
        } else {
            data
        };

        let stream = self.begin(kind).await.map_err(|e| e.in_phase(InstallPhase::Begin))?;

        let sender = ChunkSender::new(
            self.peer.clone(),
            chunk_size,
            protocol.wire_encoding,
            self.config.call_timeout(),
            self.config.write_timeout(),
        );
        let mut on_progress = options.on_progress;
        let written = sender
            .write_all(stream, &payload, |written, total| {
                if let Some(cb) = on_progress.as_mut() {
                    cb(written, total);
                }
            })
            .await;
        if let Err(e) = written {
            self.spawn_abort(stream);
            return Err(e.in_phase(InstallPhase::Write));
        }

        let reply = self
            .peer
            .call(
                Call::FinalizeInstall(StreamParams { stream }),
                self.config.call_timeout(),
            )
            .await
            .map_err(|e| e.in_phase(InstallPhase::Finalize))?;
        let result =
            InstallResult::from_reply(reply).map_err(|e| e.in_phase(InstallPhase::Finalize))?;

        tracing::info!(
            "Installed {} bundle ({:?}, {} bytes sent)",
            kind,
            result.install_type,
            payload.len()
        );
        Ok(Some(result))
    }

    /// Fetch the peer's content listing for one installed component.
    pub async fn installed_content(
        &self,
        kind: ComponentKind,
        app_id: &str,
    ) -> Result<ContentListing> {
        let query = ContentQuery {
            component_type: kind,
            app_id: app_id.to_string(),
        };
        let data = self
            .bulk
            .pull(
                &self.peer,
                TransferKind::InstalledContent,
                query.into_options(),
                self.config.call_timeout(),
            )
            .await?;
        ContentListing::from_json(&data)
    }

    async fn reduce(&self, kind: ComponentKind, data: &Bytes) -> Result<Option<Bytes>> {
        let bundle = Bundle::from_zip(data)?;
        if bundle.is_partial() {
            return Err(BridgeError::AlreadyPartial);
        }
        let manifest = bundle.manifest()?;
        let listing = self.installed_content(kind, &manifest.app_id).await?;
        make_partial_bundle(bundle, &listing)
    }

    async fn begin(&self, kind: ComponentKind) -> Result<Token> {
        let reply = self
            .peer
            .call(
                Call::BeginInstall(BeginInstallParams::new(kind)),
                self.config.call_timeout(),
            )
            .await?;
        let StreamParams { stream } = serde_json::from_value(reply)
            .map_err(|e| BridgeError::InvalidPayload(format!("begin install reply: {}", e)))?;
        tracing::debug!("Peer opened install stream {}", stream);
        Ok(stream)
    }

    /// Tell the peer to drop the stream, without waiting for the outcome.
    fn spawn_abort(&self, stream: Token) {
        let peer = self.peer.clone();
        let timeout = self.config.abort_timeout();
        tokio::spawn(async move {
            match peer
                .call(Call::AbortInstall(StreamParams { stream }), timeout)
                .await
            {
                Ok(_) => tracing::debug!("Aborted install stream {}", stream),
                Err(e) => tracing::warn!("Failed to abort install stream {}: {}", stream, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{MANIFEST_PATH, PARTIAL_MANIFEST_PATH};
    use crate::capabilities::{InstallCapabilities, ProtocolCapabilities, WireEncoding};
    use crate::install::InstallType;
    use crate::rpc::{METHOD_INSTALL_ABORT, METHOD_INSTALL_BEGIN, METHOD_WRITE};
    use crate::transfer::{ReceiverTable, TransferRegistry, TransferStream, WriteParams};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Plays the host: accepts one install stream and serves content listings.
    struct MockHost {
        registry: TransferRegistry,
        open: Mutex<Option<TransferStream>>,
        installed: Mutex<Option<Bytes>>,
        methods: Mutex<Vec<String>>,
        writes: Mutex<usize>,
        fail_write: Option<usize>,
        fail_begin: bool,
        finalize_reply: Value,
        listing: Option<ContentListing>,
        debugger_registry: TransferRegistry,
        debugger_table: ReceiverTable,
    }

    impl MockHost {
        fn new() -> Self {
            Self {
                registry: TransferRegistry::new(),
                open: Mutex::new(None),
                installed: Mutex::new(None),
                methods: Mutex::new(Vec::new()),
                writes: Mutex::new(0),
                fail_write: None,
                fail_begin: false,
                finalize_reply: json!({ "installType": "full" }),
                listing: None,
                debugger_registry: TransferRegistry::new(),
                debugger_table: ReceiverTable::new(),
            }
        }

        fn count(&self, method: &str) -> usize {
            self.methods.lock().iter().filter(|m| *m == method).count()
        }

        fn remote(method: String, code: i32) -> BridgeError {
            BridgeError::Remote {
                method,
                code,
                message: "rejected".to_string(),
            }
        }
    }

    #[async_trait]
    impl Peer for MockHost {
        async fn call(&self, call: Call, _timeout: Duration) -> Result<Value> {
            let method = call.method();
            self.methods.lock().push(method.clone());

            match call {
                Call::BeginInstall(_) => {
                    if self.fail_begin {
                        return Err(Self::remote(method, 3));
                    }
                    let stream = self.registry.create_stream(None);
                    let token = stream.token();
                    *self.open.lock() = Some(stream);
                    Ok(json!({ "stream": token }))
                }
                Call::Write(params) => {
                    let n = {
                        let mut writes = self.writes.lock();
                        *writes += 1;
                        *writes
                    };
                    if self.fail_write == Some(n) {
                        return Err(Self::remote(method, 2));
                    }
                    self.registry.write(params)?;
                    Ok(Value::Null)
                }
                Call::FinalizeInstall(_) => {
                    if let Some(stream) = self.open.lock().take() {
                        *self.installed.lock() = Some(stream.finalize()?);
                    }
                    Ok(self.finalize_reply.clone())
                }
                Call::AbortInstall(_) => {
                    self.open.lock().take();
                    Ok(Value::Null)
                }
                Call::BeginTransfer { kind, params } => {
                    let Some(listing) = self.listing.clone() else {
                        return Err(Self::remote(method, 11));
                    };
                    let registry = self.debugger_registry.clone();
                    let table = self.debugger_table.clone();
                    let token = params.stream;
                    tokio::spawn(async move {
                        while !table.is_armed(token) {
                            tokio::task::yield_now().await;
                        }
                        let data = Bytes::from(listing.to_json().unwrap());
                        registry
                            .write(WriteParams::encode(token, data, WireEncoding::Json))
                            .unwrap();
                        table.finalize(kind, token).unwrap();
                    });
                    Ok(Value::Null)
                }
                _ => Err(BridgeError::Unsupported(method)),
            }
        }
    }

    fn caps(partial: bool, max_message_size: usize, wire_encoding: WireEncoding) -> Capabilities {
        Capabilities {
            protocol: ProtocolCapabilities {
                max_message_size,
                wire_encoding,
            },
            install: InstallCapabilities {
                sideload_stream: true,
                app_bundle: true,
                companion_bundle: true,
                partial_bundle: partial,
            },
            ..Default::default()
        }
    }

    fn orchestrator(host: &Arc<MockHost>, capabilities: Capabilities) -> InstallOrchestrator {
        let bulk = BulkReceiver::new(
            host.debugger_registry.clone(),
            host.debugger_table.clone(),
            Duration::from_secs(5),
        );
        InstallOrchestrator::new(host.clone(), capabilities, BridgeConfig::default(), bulk)
    }

    fn app_bundle(files: &[(&str, &str)]) -> Bundle {
        let mut bundle = Bundle::new();
        bundle
            .insert_file(MANIFEST_PATH, r#"{"uuid":"b4ae822e"}"#)
            .unwrap();
        for (path, data) in files {
            bundle.insert_file(path, data.to_string()).unwrap();
        }
        bundle
    }

    #[tokio::test]
    async fn test_full_install_reassembles_payload() {
        let host = Arc::new(MockHost::new());
        let orch = orchestrator(&host, caps(false, 1024 + 8, WireEncoding::Json));

        let data = Bytes::from_static(b"not a bundle, sent as is");
        let result = orch
            .install_app(ComponentKind::App, data.clone(), InstallOptions::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.install_type, InstallType::Full);
        assert_eq!(host.installed.lock().clone(), Some(data));
        // 24 bytes in 6 byte chunks
        assert_eq!(host.count(METHOD_WRITE), 4);
        assert_eq!(host.count(METHOD_INSTALL_ABORT), 0);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_complete() {
        let host = Arc::new(MockHost::new());
        let orch = orchestrator(&host, caps(false, 64 * 1024, WireEncoding::Json));

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let data = Bytes::from(vec![0x5a; 128 * 1024]);
        orch.install_app(
            ComponentKind::App,
            data,
            InstallOptions::with_progress(move |written, total| seen.lock().push((written, total))),
        )
        .await
        .unwrap();

        let progress = progress.lock();
        assert_eq!(progress.len(), host.count(METHOD_WRITE));
        assert!(progress.len() > 1);
        assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(progress.iter().all(|&(_, total)| total == 128 * 1024));
        assert_eq!(progress.last().unwrap().0, 128 * 1024);
    }

    #[tokio::test]
    async fn test_write_failure_aborts_once() {
        let mut mock = MockHost::new();
        mock.fail_write = Some(2);
        let host = Arc::new(mock);
        let orch = orchestrator(&host, caps(false, 1024 + 4, WireEncoding::Binary));

        let err = orch
            .install_app(
                ComponentKind::App,
                Bytes::from_static(b"12345678"),
                InstallOptions::default(),
            )
            .await
            .unwrap_err();

        match &err {
            BridgeError::Install {
                phase: InstallPhase::Write,
                source,
            } => assert!(matches!(**source, BridgeError::Remote { code: 2, .. })),
            other => panic!("Expected write failure, got {:?}", other),
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while host.count(METHOD_INSTALL_ABORT) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(host.count(METHOD_INSTALL_ABORT), 1);
        assert_eq!(host.count(METHOD_WRITE), 2);
        assert!(host.installed.lock().is_none());
    }

    #[tokio::test]
    async fn test_begin_failure_propagates_without_abort() {
        let mut mock = MockHost::new();
        mock.fail_begin = true;
        let host = Arc::new(mock);
        let orch = orchestrator(&host, caps(false, 64 * 1024, WireEncoding::Json));

        let err = orch
            .install_app(ComponentKind::App, Bytes::from_static(b"x"), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Install {
                phase: InstallPhase::Begin,
                ..
            }
        ));
        assert_eq!(err.code(), 3);
        tokio::task::yield_now().await;
        assert_eq!(host.count(METHOD_INSTALL_ABORT), 0);
        assert_eq!(host.count(METHOD_WRITE), 0);
    }

    #[tokio::test]
    async fn test_unsupported_kind_makes_no_calls() {
        let host = Arc::new(MockHost::new());
        let mut capabilities = caps(true, 64 * 1024, WireEncoding::Json);
        capabilities.install.companion_bundle = false;
        let orch = orchestrator(&host, capabilities);

        let err = orch
            .install_app(
                ComponentKind::Companion,
                Bytes::from_static(b"x"),
                InstallOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Unsupported(_)));
        assert!(host.methods.lock().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_too_small() {
        let host = Arc::new(MockHost::new());
        let orch = orchestrator(&host, caps(false, 1000, WireEncoding::Json));

        let err = orch
            .install_app(ComponentKind::App, Bytes::from_static(b"x"), InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChunkTooSmall { .. }));
        assert!(host.methods.lock().is_empty());
    }

    #[tokio::test]
    async fn test_noop_partial_install_is_elided() {
        let bundle = app_bundle(&[("app.js", "main()")]);
        let mut mock = MockHost::new();
        mock.listing = Some(ContentListing::from_bundle(&bundle));
        let host = Arc::new(mock);
        let orch = orchestrator(&host, caps(true, 64 * 1024, WireEncoding::Json));

        let result = orch
            .install_app(
                ComponentKind::App,
                bundle.to_zip().unwrap(),
                InstallOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(
            *host.methods.lock(),
            vec![TransferKind::InstalledContent.begin_method()]
        );
    }

    #[tokio::test]
    async fn test_partial_install_ships_changes_only() {
        let installed = app_bundle(&[("app.js", "v1"), ("lib.js", "shared")]);
        let update = app_bundle(&[("app.js", "v2"), ("lib.js", "shared")]);
        let mut mock = MockHost::new();
        mock.listing = Some(ContentListing::from_bundle(&installed));
        mock.finalize_reply = json!({ "installType": "partial" });
        let host = Arc::new(mock);
        let orch = orchestrator(&host, caps(true, 64 * 1024, WireEncoding::Json));

        let result = orch
            .install_app(
                ComponentKind::App,
                update.to_zip().unwrap(),
                InstallOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.install_type, InstallType::Partial);

        let sent = host.installed.lock().clone().unwrap();
        let partial = Bundle::from_zip(&sent).unwrap();
        assert!(partial.is_partial());
        assert!(partial.contains("app.js"));
        assert!(!partial.contains("lib.js"));
        assert_eq!(
            crate::bundle::apply_partial_bundle(&installed, &partial).unwrap(),
            update
        );
    }

    #[tokio::test]
    async fn test_listing_failure_falls_back_to_full_bundle() {
        let host = Arc::new(MockHost::new());
        let orch = orchestrator(&host, caps(true, 64 * 1024, WireEncoding::Json));

        let data = app_bundle(&[("app.js", "main()")]).to_zip().unwrap();
        orch.install_app(ComponentKind::App, data.clone(), InstallOptions::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(host.installed.lock().clone(), Some(data));
        assert_eq!(host.methods.lock()[1], METHOD_INSTALL_BEGIN);
    }

    #[tokio::test]
    async fn test_already_partial_bundle_is_rejected() {
        let installed = app_bundle(&[("app.js", "v1")]);
        let mut mock = MockHost::new();
        mock.listing = Some(ContentListing::from_bundle(&installed));
        let host = Arc::new(mock);
        let orch = orchestrator(&host, caps(true, 64 * 1024, WireEncoding::Json));

        let mut partial = app_bundle(&[("app.js", "v2")]);
        partial
            .insert_file(PARTIAL_MANIFEST_PATH, r#"{"delete":[]}"#)
            .unwrap();

        let err = orch
            .install_app(
                ComponentKind::App,
                partial.to_zip().unwrap(),
                InstallOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyPartial));
        assert!(host.methods.lock().is_empty());
        assert!(host.installed.lock().is_none());
    }

    #[tokio::test]
    async fn test_missing_install_type_is_full() {
        let mut mock = MockHost::new();
        mock.finalize_reply = json!({});
        let host = Arc::new(mock);
        let orch = orchestrator(&host, caps(false, 64 * 1024, WireEncoding::Json));

        let result = orch
            .install_app(ComponentKind::App, Bytes::from_static(b"x"), InstallOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.install_type, InstallType::Full);
    }
}
