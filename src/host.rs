//! Host endpoint of a connection.
//!
//! Serves sideloading (`app.install.stream.*` plus `io.write`) and pushes
//! screenshots, heap snapshots and content listings into the debugger's
//! streams when asked to.

use crate::bundle::ContentListing;
use crate::capabilities::ProtocolCapabilities;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::install::{AcceptorState, InstallAcceptor, InstallHandler};
use crate::rpc::{Call, ContentQuery, Handler, Peer, StreamParams, TransferKind};
use crate::transfer::{max_chunk_size, ChunkSender, Token, TransferRegistry};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Device-side producers of the data a debugger can pull.
#[async_trait]
pub trait HostServices: Send + Sync {
    async fn screenshot(&self, _options: &Map<String, Value>) -> Result<Bytes> {
        Err(BridgeError::Unsupported("screenshots".to_string()))
    }

    async fn heap_snapshot(&self, _options: &Map<String, Value>) -> Result<Bytes> {
        Err(BridgeError::Unsupported("heap snapshots".to_string()))
    }

    async fn installed_content(&self, _query: &ContentQuery) -> Result<ContentListing> {
        Err(BridgeError::Unsupported("content listings".to_string()))
    }
}

pub struct Host {
    peer: Arc<dyn Peer>,
    protocol: ProtocolCapabilities,
    config: BridgeConfig,
    registry: TransferRegistry,
    acceptor: InstallAcceptor,
    services: Mutex<Option<Arc<dyn HostServices>>>,
}

impl Host {
    /// `protocol` is what was negotiated for pushes back to the debugger.
    pub fn new(peer: Arc<dyn Peer>, protocol: ProtocolCapabilities, config: BridgeConfig) -> Self {
        let registry = TransferRegistry::new();
        Self {
            peer,
            protocol,
            config,
            acceptor: InstallAcceptor::new(registry.clone()),
            registry,
            services: Mutex::new(None),
        }
    }

    pub fn set_install_handler(&self, handler: Option<Arc<dyn InstallHandler>>) {
        self.acceptor.set_install_handler(handler);
    }

    pub fn set_services(&self, services: Option<Arc<dyn HostServices>>) {
        *self.services.lock() = services;
    }

    pub fn install_state(&self) -> AcceptorState {
        self.acceptor.state()
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Accept a pull request and push the data from a detached task.
    fn begin_push(
        &self,
        kind: TransferKind,
        stream: Token,
        options: Map<String, Value>,
    ) -> Result<()> {
        let services = self
            .services
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::Unsupported(kind.prefix().to_string()))?;
        let query = match kind {
            TransferKind::InstalledContent => Some(ContentQuery::from_options(&options)?),
            _ => None,
        };
        let chunk_size = max_chunk_size(
            self.protocol.max_message_size,
            self.config.message_overhead,
            self.protocol.wire_encoding,
        )?;

        let push = Push {
            peer: self.peer.clone(),
            services,
            sender: ChunkSender::new(
                self.peer.clone(),
                chunk_size,
                self.protocol.wire_encoding,
                self.config.call_timeout(),
                self.config.write_timeout(),
            ),
            kind,
            stream,
            options,
            query,
            call_timeout: self.config.call_timeout(),
            abort_timeout: self.config.abort_timeout(),
        };
        tokio::spawn(push.run());
        Ok(())
    }
}

#[async_trait]
impl Handler for Host {
    async fn handle(&self, call: Call) -> Result<Value> {
        match call {
            Call::Write(params) => {
                self.registry.write(params)?;
                Ok(Value::Null)
            }
            Call::BeginInstall(params) => {
                let stream = self.acceptor.begin(params.component_bundle.kind)?;
                Ok(json!({ "stream": stream }))
            }
            Call::FinalizeInstall(StreamParams { stream }) => {
                let result = self.acceptor.finalize(stream).await?;
                Ok(serde_json::to_value(result)?)
            }
            Call::AbortInstall(StreamParams { stream }) => {
                self.acceptor.abort(stream)?;
                Ok(Value::Null)
            }
            Call::BeginTransfer { kind, params } => {
                self.begin_push(kind, params.stream, params.options)?;
                Ok(Value::Null)
            }
            other => Err(BridgeError::Unsupported(other.method())),
        }
    }
}

/// One host -> debugger bulk transfer.
struct Push {
    peer: Arc<dyn Peer>,
    services: Arc<dyn HostServices>,
    sender: ChunkSender,
    kind: TransferKind,
    stream: Token,
    options: Map<String, Value>,
    query: Option<ContentQuery>,
    call_timeout: Duration,
    abort_timeout: Duration,
}

impl Push {
    async fn produce(&self) -> Result<Bytes> {
        match (self.kind, &self.query) {
            (TransferKind::Screenshot, _) => self.services.screenshot(&self.options).await,
            (TransferKind::HeapSnapshot, _) => self.services.heap_snapshot(&self.options).await,
            (TransferKind::InstalledContent, Some(query)) => {
                let listing = self.services.installed_content(query).await?;
                Ok(Bytes::from(listing.to_json()?))
            }
            (TransferKind::InstalledContent, None) => Err(BridgeError::InvalidPayload(
                "content listing request without a query".to_string(),
            )),
        }
    }

    async fn deliver(&self) -> Result<usize> {
        let data = self.produce().await?;
        self.sender.write_all(self.stream, &data, |_, _| {}).await?;
        self.peer
            .call(
                Call::FinalizeTransfer {
                    kind: self.kind,
                    params: StreamParams {
                        stream: self.stream,
                    },
                },
                self.call_timeout,
            )
            .await?;
        Ok(data.len())
    }

    async fn run(self) {
        match self.deliver().await {
            Ok(len) => tracing::debug!(
                "Pushed {} bytes of {} into stream {}",
                len,
                self.kind.prefix(),
                self.stream
            ),
            Err(e) => {
                tracing::warn!(
                    "Failed to push {} into stream {}: {}",
                    self.kind.prefix(),
                    self.stream,
                    e
                );
                let abort = Call::AbortTransfer {
                    kind: self.kind,
                    params: StreamParams {
                        stream: self.stream,
                    },
                };
                if let Err(e) = self.peer.call(abort, self.abort_timeout).await {
                    tracing::warn!("Failed to abort stream {}: {}", self.stream, e);
                }
            }
        }
    }
}
