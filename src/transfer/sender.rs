//! Pushing side of a transfer: chunk a payload under the message-size ceiling
//! and write it into a peer's stream.
//!
//! Chunks are sent in position order and in flight concurrently. One sliding
//! timeout covers the whole phase: it restarts every time a chunk is
//! acknowledged.

use crate::capabilities::WireEncoding;
use crate::error::{BridgeError, Result};
use crate::rpc::{Call, Peer, METHOD_WRITE};
use crate::transfer::registry::{Token, WriteParams};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Largest chunk that still fits one message once framed and encoded.
///
/// Base64 turns every 3 bytes into 4 characters, so a text wire only carries
/// three quarters of the remaining room.
pub fn max_chunk_size(
    max_message_size: usize,
    overhead: usize,
    encoding: WireEncoding,
) -> Result<usize> {
    let room = max_message_size.saturating_sub(overhead);
    let size = match encoding {
        WireEncoding::Json => room / 4 * 3,
        WireEncoding::Binary => room,
    };
    if size < 1 {
        return Err(BridgeError::ChunkTooSmall { max_message_size });
    }
    Ok(size)
}

/// Writes payloads into a stream the peer opened for us.
#[derive(Clone)]
pub struct ChunkSender {
    peer: Arc<dyn Peer>,
    chunk_size: usize,
    encoding: WireEncoding,
    call_timeout: Duration,
    window: Duration,
}

impl ChunkSender {
    /// `window` is the sliding timeout of the whole write phase.
    pub fn new(
        peer: Arc<dyn Peer>,
        chunk_size: usize,
        encoding: WireEncoding,
        call_timeout: Duration,
        window: Duration,
    ) -> Self {
        Self {
            peer,
            chunk_size: chunk_size.max(1),
            encoding,
            call_timeout,
            window,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write all of `data` into `stream`.
    ///
    /// `on_progress(written, total)` fires after each acknowledged chunk.
    /// Returns the first failure; chunks still in flight are left to finish
    /// on their own.
    pub async fn write_all<P>(&self, stream: Token, data: &Bytes, mut on_progress: P) -> Result<()>
    where
        P: FnMut(u64, u64),
    {
        let total = data.len() as u64;
        let mut in_flight = FuturesUnordered::new();

        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.chunk_size).min(data.len());
            let chunk = data.slice(offset..end);
            let len = chunk.len() as u64;
            let call = Call::Write(WriteParams::encode(stream, chunk, self.encoding));
            let peer = self.peer.clone();
            let call_timeout = self.call_timeout;
            in_flight.push(async move { peer.call(call, call_timeout).await.map(|_| len) });
            offset = end;
        }

        tracing::debug!(
            "Writing {} bytes to stream {} in {} chunks",
            total,
            stream,
            in_flight.len()
        );

        let mut written = 0u64;
        loop {
            match tokio::time::timeout(self.window, in_flight.next()).await {
                Ok(Some(Ok(len))) => {
                    written += len;
                    on_progress(written, total);
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Ok(()),
                Err(_) => {
                    return Err(BridgeError::Timeout {
                        method: METHOD_WRITE.to_string(),
                        after: self.window,
                    })
                }
            }
        }
    }
}
