//! ChunkReader：根据设备 offset/len 逐 chunk 读取并按序拼接。

use super::chunk::ChunkLayout;
use super::store::ChunkStore;
use super::util::ChunkSpans;
use crate::error::{DeviceError, DeviceResult};
use futures::{StreamExt, stream};

pub struct ChunkReader<'a, S: ChunkStore> {
    layout: ChunkLayout,
    store: &'a S,
    max_inflight: usize,
}

impl<'a, S: ChunkStore> ChunkReader<'a, S> {
    pub fn new(layout: ChunkLayout, store: &'a S) -> Self {
        Self {
            layout,
            store,
            max_inflight: 1,
        }
    }

    /// 同一次读最多并发的 chunk 请求数；结果仍按 chunk 顺序拼接。
    pub fn max_inflight(mut self, n: usize) -> Self {
        self.max_inflight = n.max(1);
        self
    }

    /// 读取 [offset, offset+len)：输出第 i 字节对应设备第 offset+i 字节。
    /// 任意一个 chunk 失败则整个读取失败，尚未发出的请求不再发出。
    pub async fn read(&self, offset: u64, len: usize) -> DeviceResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let spans = ChunkSpans::new(self.layout, offset, len as u64);
        let mut parts = stream::iter(spans)
            .map(|sp| async move {
                self.store
                    .read_span(&sp)
                    .await
                    .map_err(|source| DeviceError::Store {
                        chunk_index: sp.chunk_index,
                        source,
                    })
            })
            .buffered(self.max_inflight);

        let mut out = Vec::with_capacity(len);
        while let Some(part) = parts.next().await {
            out.extend(part?);
        }
        debug_assert_eq!(out.len(), len);
        Ok(out)
    }
}
