//! Bridge configuration.
//!
//! Loaded from TOML; every key is optional and falls back to [`BridgeConfig::default`].
//!
//! ```toml
//! call_timeout_ms = 10000
//! write_timeout_ms = 30000
//! abort_timeout_ms = 5000
//! transfer_timeout_ms = 300000
//! message_overhead = 1024
//! ```

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bytes reserved for the RPC envelope around a chunk write
pub const DEFAULT_MESSAGE_OVERHEAD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Per-call timeout for begin/finalize style calls
    pub call_timeout_ms: u64,
    /// Sliding timeout across the whole write phase
    pub write_timeout_ms: u64,
    /// Timeout for the detached best-effort abort
    pub abort_timeout_ms: u64,
    /// How long a stream receiver waits for the peer to finalize
    pub transfer_timeout_ms: u64,
    /// Bytes reserved for protocol framing when sizing chunks
    pub message_overhead: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            write_timeout_ms: 30_000,
            abort_timeout_ms: 5_000,
            transfer_timeout_ms: 300_000,
            message_overhead: DEFAULT_MESSAGE_OVERHEAD,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}
