//! App sideloading over a transfer stream.
//!
//! Debugger side: [`InstallOrchestrator`] decides between a full and a
//! partial bundle and drives begin/write/finalize. Host side:
//! [`InstallAcceptor`] accepts one install stream at a time and hands the
//! finished bundle to an [`InstallHandler`].

pub mod acceptor;
pub mod orchestrator;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use acceptor::{AcceptorState, InstallAcceptor, InstallHandler};
pub use orchestrator::{InstallOptions, InstallOrchestrator, ProgressCallback};

/// Which component a bundle installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    App,
    Companion,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::App => "app",
            ComponentKind::Companion => "companion",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    #[default]
    Full,
    Partial,
}

/// Identity of the installed app, when the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

/// Result of `app.install.stream.finalize`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    #[serde(default)]
    pub install_type: InstallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<InstalledApp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentKind>,
}

impl InstallResult {
    /// Normalize a finalize reply. A missing install type means a full install.
    pub fn from_reply(reply: Value) -> Result<Self> {
        if reply.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(reply)?)
    }
}
