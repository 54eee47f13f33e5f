//! Method surface of the bridge and the transport seams it is consumed through.
//!
//! Framing (request ids, batching, the codec) belongs to the transport. The
//! bridge only speaks in [`Call`]s: a typed method plus its params. A
//! transport turns a `Call` into `(method, params)` with [`Call::method`] /
//! [`Call::params`] and back with [`Call::from_parts`].

pub mod local;

use crate::error::{BridgeError, Result};
use crate::install::ComponentKind;
use crate::transfer::{Token, WriteParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub use local::LocalPeer;

pub const METHOD_WRITE: &str = "io.write";
pub const METHOD_INSTALL_BEGIN: &str = "app.install.stream.begin";
pub const METHOD_INSTALL_FINALIZE: &str = "app.install.stream.finalize";
pub const METHOD_INSTALL_ABORT: &str = "app.install.stream.abort";

const SUFFIX_BEGIN: &str = ".stream.begin";
const SUFFIX_FINALIZE: &str = ".stream.finalize";
const SUFFIX_ABORT: &str = ".stream.abort";

// =============================================================================
// Transfer kinds
// =============================================================================

/// Bulk transfers the host pushes to the debugger on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Screenshot,
    HeapSnapshot,
    InstalledContent,
}

impl TransferKind {
    pub const ALL: [TransferKind; 3] = [
        TransferKind::Screenshot,
        TransferKind::HeapSnapshot,
        TransferKind::InstalledContent,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            TransferKind::Screenshot => "app.screenshot",
            TransferKind::HeapSnapshot => "app.heapSnapshot",
            TransferKind::InstalledContent => "app.contents",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    pub fn begin_method(&self) -> String {
        format!("{}{}", self.prefix(), SUFFIX_BEGIN)
    }

    pub fn finalize_method(&self) -> String {
        format!("{}{}", self.prefix(), SUFFIX_FINALIZE)
    }

    pub fn abort_method(&self) -> String {
        format!("{}{}", self.prefix(), SUFFIX_ABORT)
    }
}

// =============================================================================
// Params
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub stream: Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentBundle {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginInstallParams {
    pub component_bundle: ComponentBundle,
}

impl BeginInstallParams {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            component_bundle: ComponentBundle { kind },
        }
    }
}

/// Params of `<prefix>.stream.begin`: the token to write into plus
/// kind-specific options (capture format, content query, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginTransferParams {
    pub stream: Token,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

/// Options of an `app.contents.stream.begin` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    pub component_type: ComponentKind,
    #[serde(rename = "uuid")]
    pub app_id: String,
}

impl ContentQuery {
    pub fn into_options(self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert(
            "componentType".to_string(),
            Value::String(self.component_type.as_str().to_string()),
        );
        options.insert("uuid".to_string(), Value::String(self.app_id));
        options
    }

    pub fn from_options(options: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(options.clone()))
            .map_err(|e| BridgeError::InvalidPayload(format!("content query: {}", e)))
    }
}

// =============================================================================
// Calls
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Write(WriteParams),
    BeginInstall(BeginInstallParams),
    FinalizeInstall(StreamParams),
    AbortInstall(StreamParams),
    BeginTransfer {
        kind: TransferKind,
        params: BeginTransferParams,
    },
    FinalizeTransfer {
        kind: TransferKind,
        params: StreamParams,
    },
    AbortTransfer {
        kind: TransferKind,
        params: StreamParams,
    },
}

impl Call {
    pub fn method(&self) -> String {
        match self {
            Call::Write(_) => METHOD_WRITE.to_string(),
            Call::BeginInstall(_) => METHOD_INSTALL_BEGIN.to_string(),
            Call::FinalizeInstall(_) => METHOD_INSTALL_FINALIZE.to_string(),
            Call::AbortInstall(_) => METHOD_INSTALL_ABORT.to_string(),
            Call::BeginTransfer { kind, .. } => kind.begin_method(),
            Call::FinalizeTransfer { kind, .. } => kind.finalize_method(),
            Call::AbortTransfer { kind, .. } => kind.abort_method(),
        }
    }

    pub fn params(&self) -> Result<Value> {
        let value = match self {
            Call::Write(p) => serde_json::to_value(p)?,
            Call::BeginInstall(p) => serde_json::to_value(p)?,
            Call::FinalizeInstall(p) | Call::AbortInstall(p) => serde_json::to_value(p)?,
            Call::BeginTransfer { params, .. } => serde_json::to_value(params)?,
            Call::FinalizeTransfer { params, .. } | Call::AbortTransfer { params, .. } => {
                serde_json::to_value(params)?
            }
        };
        Ok(value)
    }

    /// Decode an inbound request. Unknown methods are [`BridgeError::Unsupported`].
    pub fn from_parts(method: &str, params: Value) -> Result<Self> {
        let bad = |e: serde_json::Error| BridgeError::InvalidPayload(format!("{}: {}", method, e));

        let call = match method {
            METHOD_WRITE => Call::Write(serde_json::from_value(params).map_err(bad)?),
            METHOD_INSTALL_BEGIN => {
                Call::BeginInstall(serde_json::from_value(params).map_err(bad)?)
            }
            METHOD_INSTALL_FINALIZE => {
                Call::FinalizeInstall(serde_json::from_value(params).map_err(bad)?)
            }
            METHOD_INSTALL_ABORT => {
                Call::AbortInstall(serde_json::from_value(params).map_err(bad)?)
            }
            _ => {
                let unsupported = || BridgeError::Unsupported(format!("method {}", method));
                if let Some(kind) = method
                    .strip_suffix(SUFFIX_BEGIN)
                    .and_then(TransferKind::from_prefix)
                {
                    Call::BeginTransfer {
                        kind,
                        params: serde_json::from_value(params).map_err(bad)?,
                    }
                } else if let Some(kind) = method
                    .strip_suffix(SUFFIX_FINALIZE)
                    .and_then(TransferKind::from_prefix)
                {
                    Call::FinalizeTransfer {
                        kind,
                        params: serde_json::from_value(params).map_err(bad)?,
                    }
                } else if let Some(kind) = method
                    .strip_suffix(SUFFIX_ABORT)
                    .and_then(TransferKind::from_prefix)
                {
                    Call::AbortTransfer {
                        kind,
                        params: serde_json::from_value(params).map_err(bad)?,
                    }
                } else {
                    return Err(unsupported());
                }
            }
        };
        Ok(call)
    }
}

// =============================================================================
// Transport seams
// =============================================================================

/// Outbound half of a connection: issue a call and wait for its result.
///
/// Implementations fail with [`BridgeError::Timeout`] when the peer does not
/// answer in time and with [`BridgeError::Remote`] when it reports an error.
#[async_trait]
pub trait Peer: Send + Sync {
    async fn call(&self, call: Call, timeout: Duration) -> Result<Value>;
}

/// Inbound half of a connection: serve one call from the peer.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, call: Call) -> Result<Value>;
}
