//! Debugger endpoint of a connection.
//!
//! Outbound it installs apps and pulls captures; inbound it only serves what
//! the host pushes back: `io.write` and the `<prefix>.stream.finalize` /
//! `.abort` signals of bulk transfers.

use crate::bundle::ContentListing;
use crate::capabilities::{Capabilities, CaptureCapabilities};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::install::{ComponentKind, InstallOptions, InstallOrchestrator, InstallResult};
use crate::rpc::{Call, Handler, Peer, TransferKind};
use crate::transfer::{BulkReceiver, ReceiverTable, Token, TransferRegistry, WriteCallback};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

pub struct Debugger {
    peer: Arc<dyn Peer>,
    capabilities: Capabilities,
    config: BridgeConfig,
    registry: TransferRegistry,
    bulk: BulkReceiver,
    installer: InstallOrchestrator,
}

impl Debugger {
    /// `capabilities` is what the host advertised during `initialize`.
    pub fn new(peer: Arc<dyn Peer>, capabilities: Capabilities, config: BridgeConfig) -> Self {
        let registry = TransferRegistry::new();
        let bulk = BulkReceiver::new(
            registry.clone(),
            ReceiverTable::new(),
            config.transfer_timeout(),
        );
        let installer = InstallOrchestrator::new(
            peer.clone(),
            capabilities.clone(),
            config.clone(),
            bulk.clone(),
        );
        Self {
            peer,
            capabilities,
            config,
            registry,
            bulk,
            installer,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    pub async fn install_app(
        &self,
        kind: ComponentKind,
        data: Bytes,
        options: InstallOptions,
    ) -> Result<Option<InstallResult>> {
        self.installer.install_app(kind, data, options).await
    }

    /// Receive a transfer the host pushes after `begin` asked it to.
    pub async fn take_bulk_transfer<F, Fut>(
        &self,
        kind: TransferKind,
        on_write: Option<WriteCallback>,
        begin: F,
    ) -> Result<Bytes>
    where
        F: FnOnce(Token) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.bulk.receive(kind, on_write, begin).await
    }

    pub async fn capture_screenshot(&self, format: &str) -> Result<Bytes> {
        self.capture(TransferKind::Screenshot, self.capabilities.screenshot.as_ref(), format)
            .await
    }

    pub async fn capture_heap_snapshot(&self, format: &str) -> Result<Bytes> {
        self.capture(
            TransferKind::HeapSnapshot,
            self.capabilities.heap_snapshot.as_ref(),
            format,
        )
        .await
    }

    pub async fn installed_content(
        &self,
        kind: ComponentKind,
        app_id: &str,
    ) -> Result<ContentListing> {
        self.installer.installed_content(kind, app_id).await
    }

    async fn capture(
        &self,
        kind: TransferKind,
        capability: Option<&CaptureCapabilities>,
        format: &str,
    ) -> Result<Bytes> {
        let capability =
            capability.ok_or_else(|| BridgeError::Unsupported(kind.prefix().to_string()))?;
        if !capability.supports_format(format) {
            return Err(BridgeError::Unsupported(format!(
                "{} in format {}",
                kind.prefix(),
                format
            )));
        }

        let mut options = Map::new();
        options.insert("format".to_string(), Value::String(format.to_string()));
        let data = self
            .bulk
            .pull(&self.peer, kind, options, self.config.call_timeout())
            .await?;
        tracing::info!("Received {} ({} bytes)", kind.prefix(), data.len());
        Ok(data)
    }
}

#[async_trait]
impl Handler for Debugger {
    async fn handle(&self, call: Call) -> Result<Value> {
        match call {
            Call::Write(params) => self.registry.write(params)?,
            Call::FinalizeTransfer { kind, params } => {
                self.bulk.table().finalize(kind, params.stream)?
            }
            Call::AbortTransfer { kind, params } => {
                tracing::warn!("Host aborted {} stream {}", kind.prefix(), params.stream);
                self.bulk.table().abort(kind, params.stream)?
            }
            other => return Err(BridgeError::Unsupported(other.method())),
        }
        Ok(Value::Null)
    }
}
