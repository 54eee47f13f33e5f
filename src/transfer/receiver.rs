//! Receiving side of "peer pushes bulk data to us" transfers.
//!
//! Every pull (screenshot, heap snapshot, installed content listing) follows
//! the same shape:
//! 1. open a stream locally, so any write that arrives has a target
//! 2. ask the peer to start writing into it
//! 3. once the peer accepted, arm a context for the token
//! 4. the peer's `<prefix>.stream.finalize` / `.abort` settles the result
//!
//! The context is popped and settled under one lock, so a token settles at
//! most once. A receive that ends any other way (timeout, or the caller
//! dropping the future) disarms its context and drains the stream.

use crate::error::{BridgeError, Result};
use crate::rpc::{BeginTransferParams, Call, Peer, TransferKind};
use crate::transfer::registry::{Token, TransferRegistry, TransferStream, WriteCallback};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

struct ReceiverContext {
    kind: TransferKind,
    stream: TransferStream,
    settle: oneshot::Sender<Result<Bytes>>,
}

/// Armed receiver contexts, keyed by stream token.
#[derive(Clone, Default)]
pub struct ReceiverTable {
    contexts: Arc<Mutex<HashMap<Token, ReceiverContext>>>,
}

impl ReceiverTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(
        &self,
        kind: TransferKind,
        stream: TransferStream,
        settle: oneshot::Sender<Result<Bytes>>,
    ) -> ArmedContext<'_> {
        let token = stream.token();
        self.contexts.lock().insert(
            token,
            ReceiverContext {
                kind,
                stream,
                settle,
            },
        );
        ArmedContext {
            table: self,
            kind,
            token,
        }
    }

    fn take(&self, kind: TransferKind, token: Token) -> Result<ReceiverContext> {
        let mut contexts = self.contexts.lock();
        match contexts.remove(&token) {
            Some(ctx) if ctx.kind == kind => Ok(ctx),
            Some(ctx) => {
                contexts.insert(token, ctx);
                Err(BridgeError::UnknownStream(token))
            }
            None => Err(BridgeError::UnknownStream(token)),
        }
    }

    /// Peer finished writing: resolve with the stream's bytes.
    pub fn finalize(&self, kind: TransferKind, token: Token) -> Result<()> {
        let ctx = self.take(kind, token).map_err(|e| {
            tracing::warn!("{} for unarmed stream {}", kind.finalize_method(), token);
            e
        })?;
        let result = ctx.stream.finalize();
        if ctx.settle.send(result).is_err() {
            tracing::debug!("Receiver for stream {} went away before finalize", token);
        }
        Ok(())
    }

    /// Peer gave up: drain the stream and reject with [`BridgeError::Aborted`].
    pub fn abort(&self, kind: TransferKind, token: Token) -> Result<()> {
        let ctx = self.take(kind, token).map_err(|e| {
            tracing::warn!("{} for unarmed stream {}", kind.abort_method(), token);
            e
        })?;
        let _ = ctx.stream.finalize();
        if ctx.settle.send(Err(BridgeError::Aborted)).is_err() {
            tracing::debug!("Receiver for stream {} went away before abort", token);
        }
        Ok(())
    }

    pub fn is_armed(&self, token: Token) -> bool {
        self.contexts.lock().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }
}

/// Disarms its context when the receive ends without a peer signal,
/// including when the receiving future is dropped.
struct ArmedContext<'a> {
    table: &'a ReceiverTable,
    kind: TransferKind,
    token: Token,
}

impl Drop for ArmedContext<'_> {
    fn drop(&mut self) {
        // Dropping the context drains the stream.
        if self.table.take(self.kind, self.token).is_ok() {
            tracing::debug!("Disarmed unsettled receiver for stream {}", self.token);
        }
    }
}

/// Correlates outgoing begin requests with incoming finalize/abort signals.
#[derive(Clone)]
pub struct BulkReceiver {
    registry: TransferRegistry,
    table: ReceiverTable,
    wait: Duration,
}

impl BulkReceiver {
    /// `wait` bounds how long to wait for the peer's finalize once it accepted.
    pub fn new(registry: TransferRegistry, table: ReceiverTable, wait: Duration) -> Self {
        Self {
            registry,
            table,
            wait,
        }
    }

    pub fn table(&self) -> &ReceiverTable {
        &self.table
    }

    /// Receive one transfer. `begin` tells the peer, out of band, to start
    /// writing into the given token.
    pub async fn receive<F, Fut>(
        &self,
        kind: TransferKind,
        on_write: Option<WriteCallback>,
        begin: F,
    ) -> Result<Bytes>
    where
        F: FnOnce(Token) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let stream = self.registry.create_stream(on_write);
        let token = stream.token();

        if let Err(e) = begin(token).await {
            let _ = stream.finalize();
            return Err(e);
        }

        let (tx, rx) = oneshot::channel();
        let _armed = self.table.arm(kind, stream, tx);

        match tokio::time::timeout(self.wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Aborted),
            Err(_) => Err(BridgeError::Timeout {
                method: kind.finalize_method(),
                after: self.wait,
            }),
        }
    }

    /// Receive one transfer started by the standard `<prefix>.stream.begin` call.
    pub async fn pull(
        &self,
        peer: &Arc<dyn Peer>,
        kind: TransferKind,
        options: Map<String, Value>,
        call_timeout: Duration,
    ) -> Result<Bytes> {
        self.receive(kind, None, move |stream| {
            let peer = peer.clone();
            async move {
                let call = Call::BeginTransfer {
                    kind,
                    params: BeginTransferParams { stream, options },
                };
                peer.call(call, call_timeout).await.map(|_| ())
            }
        })
        .await
    }
}
