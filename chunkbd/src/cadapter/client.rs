//! High-level client API for the chunk store
//!
//! Reader/writer code talks to [`ChunkClient`], which builds a typed
//! [`ChunkRequest`] for each tile and checks what the backend returns.
//! Backends only move bytes; they never see device offsets.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use tracing::debug;

/// A request against one chunk. Absent offset/length mean "from 0" and
/// "to the end of the chunk".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub chunk_index: u64,
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

impl ChunkRequest {
    pub fn chunk(chunk_index: u64) -> Self {
        Self {
            chunk_index,
            offset: None,
            length: None,
        }
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn start(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

/// Transport-level chunk store operations.
#[async_trait]
pub trait ChunkBackend: Send + Sync {
    async fn read_chunk(&self, req: &ChunkRequest) -> StoreResult<Vec<u8>>;

    /// `data.len()` determines how many bytes are written at `req.offset`.
    async fn write_chunk(&self, req: &ChunkRequest, data: &[u8]) -> StoreResult<()>;
}

pub struct ChunkClient<B: ChunkBackend> {
    backend: B,
}

impl<B: ChunkBackend> ChunkClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Reads exactly `len` bytes of chunk `chunk_index` starting at `offset`.
    pub async fn read_range(&self, chunk_index: u64, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let req = ChunkRequest::chunk(chunk_index)
            .offset(offset)
            .length(len as u64);
        debug!(chunk_index, offset, len, "read_chunk");
        let data = self.backend.read_chunk(&req).await?;
        if data.len() != len {
            return Err(StoreError::ShortPayload {
                expected: len,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    pub async fn write_range(&self, chunk_index: u64, offset: u64, data: &[u8]) -> StoreResult<()> {
        let req = ChunkRequest::chunk(chunk_index).offset(offset);
        debug!(chunk_index, offset, len = data.len(), "write_chunk");
        self.backend.write_chunk(&req, data).await
    }
}
