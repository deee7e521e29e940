//! ChunkWriter：将写入缓冲按 chunk 拆分并写入 chunk 存储。

use super::chunk::ChunkLayout;
use super::store::ChunkStore;
use super::util::{ChunkSpan, ChunkSpans};
use crate::error::{DeviceError, DeviceResult};
use futures::{StreamExt, stream};
use std::ops::Range;

pub struct ChunkWriter<'a, S: ChunkStore> {
    layout: ChunkLayout,
    store: &'a S,
    max_inflight: usize,
}

impl<'a, S: ChunkStore> ChunkWriter<'a, S> {
    pub fn new(layout: ChunkLayout, store: &'a S) -> Self {
        Self {
            layout,
            store,
            max_inflight: 1,
        }
    }

    pub fn max_inflight(mut self, n: usize) -> Self {
        self.max_inflight = n.max(1);
        self
    }

    /// 将一段设备写入（offset+buf）拆分为若干 chunk 写入。
    ///
    /// 每段数据取自 `buf[cursor..cursor+len]`，cursor 为之前各段长度之和，
    /// 与段在 chunk 内的偏移无关。
    pub async fn write(&self, offset: u64, buf: &[u8]) -> DeviceResult<()> {
        let jobs = ChunkSpans::new(self.layout, offset, buf.len() as u64).scan(
            0usize,
            |cursor, sp| {
                let range = *cursor..*cursor + sp.len;
                *cursor += sp.len;
                Some((sp, range))
            },
        );
        self.run(buf, jobs).await
    }

    /// 向 [offset, offset+count) 写入 0，所有段共用一个不超过 chunk 大小的零缓冲。
    pub async fn write_zeroes(&self, offset: u64, count: u64) -> DeviceResult<()> {
        if count == 0 {
            return Ok(());
        }
        let zeros = vec![0u8; count.min(self.layout.chunk_size) as usize];
        let jobs = ChunkSpans::new(self.layout, offset, count).map(|sp| (sp, 0..sp.len));
        self.run(&zeros, jobs).await
    }

    /// 按顺序发出各段写入；`src[range]` 为该段的数据。
    async fn run<I>(&self, src: &[u8], jobs: I) -> DeviceResult<()>
    where
        I: Iterator<Item = (ChunkSpan, Range<usize>)>,
    {
        let mut results = stream::iter(jobs)
            .map(move |(sp, range)| {
                let data = &src[range];
                async move {
                    self.store
                        .write_span(&sp, data)
                        .await
                        .map_err(|source| DeviceError::Store {
                            chunk_index: sp.chunk_index,
                            source,
                        })
                }
            })
            .buffered(self.max_inflight);
        while let Some(res) = results.next().await {
            res?;
        }
        Ok(())
    }
}
