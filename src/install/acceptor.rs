//! Host side of sideloading: a single-slot install stream.
//!
//! ```text
//! NoStream --begin--> StreamOpen --finalize--> NoStream (handler invoked)
//!                               \--abort-----> NoStream
//! ```

use crate::error::{BridgeError, Result};
use crate::install::{ComponentKind, InstallResult};
use crate::transfer::{Token, TransferRegistry, TransferStream};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Installs a received bundle on the host.
#[async_trait]
pub trait InstallHandler: Send + Sync {
    async fn install(&self, kind: ComponentKind, bundle: Bytes) -> Result<InstallResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    NoStream,
    StreamOpen { token: Token, kind: ComponentKind },
}

struct PendingInstall {
    kind: ComponentKind,
    stream: TransferStream,
}

pub struct InstallAcceptor {
    registry: TransferRegistry,
    pending: Mutex<Option<PendingInstall>>,
    handler: Mutex<Option<Arc<dyn InstallHandler>>>,
}

impl InstallAcceptor {
    pub fn new(registry: TransferRegistry) -> Self {
        Self {
            registry,
            pending: Mutex::new(None),
            handler: Mutex::new(None),
        }
    }

    pub fn set_install_handler(&self, handler: Option<Arc<dyn InstallHandler>>) {
        *self.handler.lock() = handler;
    }

    pub fn state(&self) -> AcceptorState {
        match self.pending.lock().as_ref() {
            Some(p) => AcceptorState::StreamOpen {
                token: p.stream.token(),
                kind: p.kind,
            },
            None => AcceptorState::NoStream,
        }
    }

    /// Open the install stream. Rejected while another one is open.
    pub fn begin(&self, kind: ComponentKind) -> Result<Token> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(BridgeError::StreamBusy);
        }
        let stream = self.registry.create_stream(None);
        let token = stream.token();
        *pending = Some(PendingInstall { kind, stream });
        tracing::info!("Accepted {} install stream {}", kind, token);
        Ok(token)
    }

    pub fn validate(&self, token: Token) -> Result<()> {
        Self::check(self.pending.lock().as_ref(), token)
    }

    fn check(pending: Option<&PendingInstall>, token: Token) -> Result<()> {
        match pending {
            None => Err(BridgeError::NoCurrentStream),
            Some(p) if p.stream.token() != token => Err(BridgeError::TokenMismatch {
                expected: p.stream.token(),
                actual: token,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Close the stream and install what was written to it.
    pub async fn finalize(&self, token: Token) -> Result<InstallResult> {
        let (pending, handler) = {
            let mut slot = self.pending.lock();
            Self::check(slot.as_ref(), token)?;
            let handler = self
                .handler
                .lock()
                .clone()
                .ok_or(BridgeError::NoInstallHandler)?;
            let pending = slot.take().ok_or(BridgeError::NoCurrentStream)?;
            (pending, handler)
        };

        let bundle = pending.stream.finalize()?;
        tracing::info!(
            "Installing {} bundle from stream {} ({} bytes)",
            pending.kind,
            token,
            bundle.len()
        );
        handler.install(pending.kind, bundle).await
    }

    /// Close the stream and discard what was written to it.
    pub fn abort(&self, token: Token) -> Result<()> {
        let pending = {
            let mut slot = self.pending.lock();
            Self::check(slot.as_ref(), token)?;
            slot.take().ok_or(BridgeError::NoCurrentStream)?
        };
        let discarded = pending.stream.finalize()?;
        tracing::info!(
            "Aborted install stream {} ({} bytes discarded)",
            token,
            discarded.len()
        );
        Ok(())
    }
}
