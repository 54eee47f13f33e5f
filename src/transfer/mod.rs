//! Bulk data transfers over a size-limited message transport.
//!
//! Large payloads (install bundles, screenshots, heap snapshots, content
//! listings) never travel in a single message. The receiving side opens a
//! stream in its [`TransferRegistry`] and hands the token to the peer, the
//! peer issues one `io.write` per chunk, then signals finalize or abort.
//!
//! ```text
//! +--------------+   io.write(token, chunk)   +------------------+
//! | ChunkSender  | -------------------------> | TransferRegistry |
//! | (pushing     |   ...                      |  token -> buffer |
//! |  side)       |   <prefix>.stream.finalize +------------------+
//! +--------------+ -------------------------> | ReceiverTable    |
//!                                             +------------------+
//! ```

pub mod receiver;
pub mod registry;
pub mod sender;

pub use receiver::{BulkReceiver, ReceiverTable};
pub use registry::{
    ChunkData, ChunkEncoding, Token, TransferRegistry, TransferStream, WriteCallback, WriteParams,
};
pub use sender::{max_chunk_size, ChunkSender};
