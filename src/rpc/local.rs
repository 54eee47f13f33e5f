//! In-process transport - connects two endpoints without a wire.
//!
//! Used for testing and for embedding a debugger and a host in one process.
//! Handler errors come back as [`BridgeError::Remote`], the way a real
//! transport reports a peer failure.

use crate::error::{BridgeError, Result};
use crate::rpc::{Call, Handler, Peer};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Outbound link to a handler living in the same process.
///
/// Holds the target weakly, so two endpoints pointing at each other do not
/// keep each other alive.
#[derive(Default)]
pub struct LocalPeer {
    target: Mutex<Option<Weak<dyn Handler>>>,
}

impl LocalPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route every call from now on to `handler`.
    pub fn connect(&self, handler: Weak<dyn Handler>) {
        *self.target.lock() = Some(handler);
    }

    pub fn connect_handler<H: Handler + 'static>(&self, handler: &Arc<H>) {
        let handler: Arc<dyn Handler> = handler.clone();
        self.connect(Arc::downgrade(&handler));
    }

    pub fn disconnect(&self) {
        *self.target.lock() = None;
    }

    fn target(&self) -> Option<Arc<dyn Handler>> {
        self.target.lock().as_ref().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl Peer for LocalPeer {
    async fn call(&self, call: Call, timeout: Duration) -> Result<Value> {
        let method = call.method();
        let handler = self.target().ok_or_else(|| BridgeError::Remote {
            method: method.clone(),
            code: BridgeError::CODE_INTERNAL,
            message: "peer is not connected".to_string(),
        })?;

        match tokio::time::timeout(timeout, handler.handle(call)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BridgeError::Remote {
                method,
                code: e.code(),
                message: e.to_string(),
            }),
            Err(_) => Err(BridgeError::Timeout {
                method,
                after: timeout,
            }),
        }
    }
}
