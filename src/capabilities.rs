//! Peer capabilities, as advertised in the `initialize` handshake.
//!
//! Read-only after the connection is set up. Only the fields the bridge
//! branches on are modeled; unknown fields are ignored.

use crate::install::ComponentKind;
use serde::{Deserialize, Serialize};

/// Message size assumed when the peer does not advertise one
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Serialization negotiated for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    /// Text codec; chunk data travels base64-encoded
    #[default]
    Json,
    /// Binary codec; chunk data travels as raw bytes
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolCapabilities {
    pub max_message_size: usize,
    pub wire_encoding: WireEncoding,
}

impl Default for ProtocolCapabilities {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            wire_encoding: WireEncoding::Json,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallCapabilities {
    pub sideload_stream: bool,
    pub app_bundle: bool,
    pub companion_bundle: bool,
    pub partial_bundle: bool,
}

/// One entry of the app compatibility matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatDescriptor {
    pub family: String,
    pub version: String,
    pub api_versions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureCapabilities {
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub protocol: ProtocolCapabilities,
    pub install: InstallCapabilities,
    pub app_compat: Vec<CompatDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<CaptureCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_snapshot: Option<CaptureCapabilities>,
}

impl Capabilities {
    /// Whether the peer takes sideloaded bundles of this kind.
    pub fn accepts(&self, kind: ComponentKind) -> bool {
        self.install.sideload_stream
            && match kind {
                ComponentKind::App => self.install.app_bundle,
                ComponentKind::Companion => self.install.companion_bundle,
            }
    }

    pub fn supports_partial(&self) -> bool {
        self.install.partial_bundle
    }
}

impl CaptureCapabilities {
    /// An empty format list means the peer did not restrict formats.
    pub fn supports_format(&self, format: &str) -> bool {
        self.formats.is_empty() || self.formats.iter().any(|f| f == format)
    }
}
