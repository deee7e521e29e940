//! 存储后端抽象：chunk 级读写接口 + 内存实现（异步）。

use super::chunk::ChunkLayout;
use super::util::ChunkSpan;
use crate::cadapter::client::{ChunkBackend, ChunkClient};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 抽象 chunk 存储接口（由 cadapter 的 ChunkClient 或内存实现提供）。
// ensure span.offset_in_chunk + span.len <= chunk_size
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn read_span(&self, span: &ChunkSpan) -> StoreResult<Vec<u8>>;

    async fn write_span(&self, span: &ChunkSpan, data: &[u8]) -> StoreResult<()>;
}

#[async_trait]
impl<S: ChunkStore + ?Sized> ChunkStore for Arc<S> {
    async fn read_span(&self, span: &ChunkSpan) -> StoreResult<Vec<u8>> {
        (**self).read_span(span).await
    }

    async fn write_span(&self, span: &ChunkSpan, data: &[u8]) -> StoreResult<()> {
        (**self).write_span(span, data).await
    }
}

#[async_trait]
impl<B: ChunkBackend> ChunkStore for ChunkClient<B> {
    async fn read_span(&self, span: &ChunkSpan) -> StoreResult<Vec<u8>> {
        self.read_range(span.chunk_index, span.offset_in_chunk, span.len)
            .await
    }

    async fn write_span(&self, span: &ChunkSpan, data: &[u8]) -> StoreResult<()> {
        debug_assert_eq!(span.len, data.len(), "slice does not match its span");
        self.write_range(span.chunk_index, span.offset_in_chunk, data)
            .await
    }
}

/// 便捷别名：基于 HTTP chunk 接口的 ChunkStore
pub type HttpChunkStore = ChunkClient<crate::cadapter::http::HttpBackend>;
/// 便捷别名：基于 LocalFsBackend 的 ChunkStore（mock 本地目录）
pub type LocalFsChunkStore = ChunkClient<crate::cadapter::localfs::LocalFsBackend>;

/// 内存实现收到的一次请求。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Read(ChunkSpan),
    Write(ChunkSpan),
}

/// 简单内存实现：用于本地开发/测试，记录请求序列并可注入失败。
pub struct InMemoryChunkStore {
    layout: ChunkLayout,
    chunks: Mutex<HashMap<u64, Vec<u8>>>, // 每个 chunk 固定大小
    ops: Mutex<Vec<StoreOp>>,
    fail_on: Mutex<Option<u64>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryChunkStore {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            layout,
            chunks: Mutex::new(HashMap::new()),
            ops: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// 之后所有触及 `chunk_index` 的请求都返回错误。
    pub fn fail_on_chunk(&self, chunk_index: u64) {
        *lock(&self.fail_on) = Some(chunk_index);
    }

    pub fn heal(&self) {
        *lock(&self.fail_on) = None;
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        lock(&self.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.ops).clear();
    }

    pub fn chunk(&self, chunk_index: u64) -> Option<Vec<u8>> {
        lock(&self.chunks).get(&chunk_index).cloned()
    }

    fn check(&self, span: &ChunkSpan) -> StoreResult<()> {
        if *lock(&self.fail_on) == Some(span.chunk_index) {
            return Err(StoreError::Injected(format!(
                "injected failure on chunk {}",
                span.chunk_index
            )));
        }
        if span.offset_in_chunk + span.len as u64 > self.layout.chunk_size {
            return Err(StoreError::OutOfChunk {
                offset: span.offset_in_chunk,
                len: span.len,
                chunk_size: self.layout.chunk_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn read_span(&self, span: &ChunkSpan) -> StoreResult<Vec<u8>> {
        lock(&self.ops).push(StoreOp::Read(*span));
        self.check(span)?;
        let start = span.offset_in_chunk as usize;
        let end = start + span.len;
        match lock(&self.chunks).get(&span.chunk_index) {
            Some(buf) => Ok(buf[start..end].to_vec()),
            // 未写入的洞返回 0
            None => Ok(vec![0u8; span.len]),
        }
    }

    async fn write_span(&self, span: &ChunkSpan, data: &[u8]) -> StoreResult<()> {
        lock(&self.ops).push(StoreOp::Write(*span));
        self.check(span)?;
        let start = span.offset_in_chunk as usize;
        let end = start + data.len();
        let chunk_size = self.layout.chunk_size as usize;
        let mut chunks = lock(&self.chunks);
        let buf = chunks
            .entry(span.chunk_index)
            .or_insert_with(|| vec![0u8; chunk_size]);
        buf[start..end].copy_from_slice(data);
        Ok(())
    }
}
