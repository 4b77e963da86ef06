//! Packet buffer management.
//!
//! Packets travel through the stack as [`ChunkedBuffer`]s: scatter-gather
//! sequences of chunks that either own a block of the shared
//! [`MemPool`](embernet_pool::MemPool) or borrow memory owned by someone
//! else (a receive frame, an application payload, another buffer).
//!
//! # Reference
//! RFC 8200 §4.5 (largest reassembled datagram drives the chunk limit)

mod chunked;

pub use chunked::{ChunkKind, ChunkedBuffer, MAX_CHUNK_COUNT};
pub use embernet_pool::{MemPool, BLOCK_SIZE};
