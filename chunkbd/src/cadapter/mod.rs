//! Chunk store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: typed chunk requests and the client used by reader/writer code
//! - `http`: `read_chunk`/`write_chunk` HTTP backend (base64 payloads)
//! - `localfs`: local directory backend, one file per chunk
//!
//! Responsibilities summary:
//! - Issue a read or write for a byte range that lies inside a single chunk.
//! - Encode/decode the wire payload and validate what the store returns.
//! - Surface transport, status and payload failures as distinct errors; retry
//!   policy belongs to the transport, not to this layer.
pub mod client;
pub mod http;
pub mod localfs;
