//! Chunk mapping (chuck)
//!
//! Responsibilities:
//! - Describe the fixed-size chunk layout of the virtual device.
//! - Split an arbitrary device byte range into per-chunk spans that tile it
//!   exactly, in ascending chunk order.
//! - Read and write device ranges span by span on top of a [`store::ChunkStore`].
//!
//! Submodules:
//! - `chunk`: chunk layout and index/offset arithmetic
//! - `util`: range splitting into chunk spans
//! - `store`: chunk store trait, in-memory store
//! - `reader` / `writer`: range reads and writes over a store
pub mod chunk;
pub mod reader;
pub mod store;
pub mod util;
pub mod writer;
