//! Token-keyed registry of in-flight transfer streams.
//!
//! Allocation and registration of a token happen under the same lock, so a
//! token can never be handed out without a stream behind it.

use crate::capabilities::WireEncoding;
use crate::error::{BridgeError, Result};
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of one in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Called after every accepted chunk with `(chunk_len, running_total)`.
pub type WriteCallback = Arc<dyn Fn(usize, u64) + Send + Sync>;

/// Text-safe chunk encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkEncoding {
    Base64,
}

/// Chunk payload as it arrives from the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkData {
    Text(String),
    Raw(Bytes),
}

/// Parameters of `io.write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteParams {
    pub stream: Token,
    pub data: ChunkData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<ChunkEncoding>,
}

impl WriteParams {
    /// Wrap a chunk for the active wire encoding.
    pub fn encode(stream: Token, chunk: Bytes, wire: WireEncoding) -> Self {
        match wire {
            WireEncoding::Json => Self {
                stream,
                data: ChunkData::Text(base64::engine::general_purpose::STANDARD.encode(&chunk)),
                encoding: Some(ChunkEncoding::Base64),
            },
            WireEncoding::Binary => Self {
                stream,
                data: ChunkData::Raw(chunk),
                encoding: None,
            },
        }
    }

    /// Decode the payload without touching any stream state.
    fn decode(self) -> Result<Bytes> {
        match (self.encoding, self.data) {
            (Some(ChunkEncoding::Base64), ChunkData::Text(text)) => {
                base64::engine::general_purpose::STANDARD
                    .decode(text.as_bytes())
                    .map(Bytes::from)
                    .map_err(|e| BridgeError::InvalidPayload(format!("malformed base64: {}", e)))
            }
            (Some(ChunkEncoding::Base64), ChunkData::Raw(_)) => Err(BridgeError::InvalidPayload(
                "base64 chunk must be a string".to_string(),
            )),
            (None, ChunkData::Raw(bytes)) => Ok(bytes),
            (None, ChunkData::Text(_)) => Err(BridgeError::InvalidPayload(
                "raw chunk must be a byte sequence".to_string(),
            )),
        }
    }
}

struct StreamBuffer {
    chunks: Vec<Bytes>,
    total_len: u64,
    on_write: Option<WriteCallback>,
}

#[derive(Default)]
struct RegistryState {
    next_token: u64,
    streams: HashMap<Token, StreamBuffer>,
}

/// All open transfer streams on one side of a connection.
#[derive(Clone, Default)]
pub struct TransferRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new stream under a fresh token.
    pub fn create_stream(&self, on_write: Option<WriteCallback>) -> TransferStream {
        let mut state = self.state.lock();
        let token = loop {
            state.next_token = state.next_token.wrapping_add(1);
            let candidate = Token(state.next_token);
            if !state.streams.contains_key(&candidate) {
                break candidate;
            }
        };
        state.streams.insert(
            token,
            StreamBuffer {
                chunks: Vec::new(),
                total_len: 0,
                on_write,
            },
        );
        tracing::debug!("Opened transfer stream {}", token);

        TransferStream {
            token,
            registry: self.clone(),
            finished: false,
        }
    }

    /// Append one decoded chunk to the stream named in `params`.
    ///
    /// A chunk that fails to decode leaves the stream untouched.
    pub fn write(&self, params: WriteParams) -> Result<()> {
        let token = params.stream;
        let (on_write, chunk_len, total) = {
            let mut state = self.state.lock();
            let buffer = state
                .streams
                .get_mut(&token)
                .ok_or(BridgeError::UnknownStream(token))?;
            let chunk = params.decode()?;
            let chunk_len = chunk.len();
            buffer.total_len += chunk_len as u64;
            buffer.chunks.push(chunk);
            (buffer.on_write.clone(), chunk_len, buffer.total_len)
        };

        tracing::trace!("Stream {} +{} bytes ({} total)", token, chunk_len, total);
        if let Some(on_write) = on_write {
            on_write(chunk_len, total);
        }
        Ok(())
    }

    /// Remove the stream and return its chunks concatenated in receipt order.
    pub fn finalize(&self, token: Token) -> Result<Bytes> {
        let buffer = self
            .state
            .lock()
            .streams
            .remove(&token)
            .ok_or(BridgeError::UnknownStream(token))?;

        let mut out = BytesMut::with_capacity(buffer.total_len as usize);
        for chunk in &buffer.chunks {
            out.extend_from_slice(chunk);
        }
        tracing::debug!("Finalized transfer stream {} ({} bytes)", token, out.len());
        Ok(out.freeze())
    }

    pub fn contains(&self, token: Token) -> bool {
        self.state.lock().streams.contains_key(&token)
    }

    /// Bytes buffered so far for an open stream.
    pub fn buffered_len(&self, token: Token) -> Option<u64> {
        self.state.lock().streams.get(&token).map(|b| b.total_len)
    }

    pub fn len(&self) -> usize {
        self.state.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().streams.is_empty()
    }
}

/// Handle to one open stream. Finalizing consumes it; dropping it unfinalized
/// drains the stream from its registry.
pub struct TransferStream {
    token: Token,
    registry: TransferRegistry,
    finished: bool,
}

impl TransferStream {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn finalize(mut self) -> Result<Bytes> {
        self.finished = true;
        self.registry.finalize(self.token)
    }
}

impl fmt::Debug for TransferStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferStream")
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for TransferStream {
    fn drop(&mut self) {
        if !self.finished && self.registry.finalize(self.token).is_ok() {
            tracing::debug!("Drained abandoned transfer stream {}", self.token);
        }
    }
}
