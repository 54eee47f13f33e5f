//! Error types for the developer bridge.
//!
//! Every failure that can cross the wire carries a stable numeric code
//! (see [`BridgeError::code`]) so a peer can tell protocol validation
//! failures apart from transport timeouts.

use crate::transfer::Token;
use std::fmt;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Phase of an install in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Begin,
    Write,
    Finalize,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallPhase::Begin => "begin",
            InstallPhase::Write => "write",
            InstallPhase::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("unknown stream {0}")]
    UnknownStream(Token),

    #[error("invalid chunk payload: {0}")]
    InvalidPayload(String),

    #[error("an install stream is already open")]
    StreamBusy,

    #[error("no install stream is open")]
    NoCurrentStream,

    #[error("stream {actual} does not match the open install stream {expected}")]
    TokenMismatch { expected: Token, actual: Token },

    #[error("no install handler configured")]
    NoInstallHandler,

    #[error("bundle is already a partial bundle")]
    AlreadyPartial,

    #[error("no files in the bundle can be reused from the existing install")]
    NoReusableFiles,

    #[error("transfer aborted by peer")]
    Aborted,

    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("peer rejected {method} (code {code}): {message}")]
    Remote {
        method: String,
        code: i32,
        message: String,
    },

    #[error("maximum message size {max_message_size} leaves no room for chunk data")]
    ChunkTooSmall { max_message_size: usize },

    #[error("peer does not support {0}")]
    Unsupported(String),

    #[error("install failed during {phase}: {source}")]
    Install {
        phase: InstallPhase,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl BridgeError {
    pub const CODE_INTERNAL: i32 = -32603;

    /// Stable error code reported to the peer.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::UnknownStream(_) => 1,
            BridgeError::InvalidPayload(_) => 2,
            BridgeError::StreamBusy => 3,
            BridgeError::NoCurrentStream => 4,
            BridgeError::TokenMismatch { .. } => 5,
            BridgeError::NoInstallHandler => 6,
            BridgeError::AlreadyPartial => 7,
            BridgeError::NoReusableFiles => 8,
            BridgeError::Aborted => 9,
            BridgeError::Timeout { .. } => 10,
            BridgeError::Unsupported(_) => 11,
            BridgeError::InvalidBundle(_) | BridgeError::InvalidManifest(_) => 12,
            BridgeError::Remote { code, .. } => *code,
            BridgeError::Install { source, .. } => source.code(),
            _ => Self::CODE_INTERNAL,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            BridgeError::Timeout { .. } => true,
            BridgeError::Install { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    pub(crate) fn in_phase(self, phase: InstallPhase) -> Self {
        BridgeError::Install {
            phase,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_error_reports_phase_and_cause() {
        let err = BridgeError::Timeout {
            method: "io.write".to_string(),
            after: Duration::from_millis(10),
        }
        .in_phase(InstallPhase::Write);

        assert!(err.is_timeout());
        assert_eq!(err.code(), 10);
        assert_eq!(
            err.to_string(),
            "install failed during write: io.write timed out after 10ms"
        );
    }

    #[test]
    fn test_remote_code_passes_through() {
        let err = BridgeError::Remote {
            method: "app.install.stream.begin".to_string(),
            code: 3,
            message: "busy".to_string(),
        };
        assert_eq!(err.code(), 3);
        assert!(!err.is_timeout());
    }
}
