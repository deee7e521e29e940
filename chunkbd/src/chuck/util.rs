//! 通用工具：将设备上的字节范围按 chunk 进行拆分。

use super::chunk::ChunkLayout;

/// 设备范围在某个 chunk 内的一段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub chunk_index: u64,
    pub offset_in_chunk: u64,
    pub len: usize,
}

impl ChunkSpan {
    /// 该段在虚拟设备上的起始偏移。
    pub fn device_offset(&self, layout: ChunkLayout) -> u64 {
        layout.chunk_start(self.chunk_index) + self.offset_in_chunk
    }
}

/// 按 chunk 边界逐段推进的迭代器。
///
/// 每一步都用同一套公式计算：`chunk_index = cur / chunk_size`，
/// `offset_in_chunk = cur % chunk_size`，长度取剩余量与 chunk 余量的较小者。
#[derive(Debug, Clone)]
pub struct ChunkSpans {
    layout: ChunkLayout,
    cursor: u64,
    remaining: u64,
}

impl ChunkSpans {
    pub fn new(layout: ChunkLayout, offset: u64, len: u64) -> Self {
        Self {
            layout,
            cursor: offset,
            remaining: len,
        }
    }
}

impl Iterator for ChunkSpans {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        if self.remaining == 0 {
            return None;
        }
        let ci = self.layout.chunk_index_of(self.cursor);
        let off_in_chunk = self.layout.within_chunk_offset(self.cursor);
        let cap = self.layout.chunk_size - off_in_chunk;
        let take = cap.min(self.remaining);
        self.cursor += take;
        self.remaining -= take;
        Some(ChunkSpan {
            chunk_index: ci,
            offset_in_chunk: off_in_chunk,
            len: take as usize,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.remaining == 0 {
            return (0, Some(0));
        }
        let head = self.layout.within_chunk_offset(self.cursor);
        let n = (head + self.remaining).div_ceil(self.layout.chunk_size) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for ChunkSpans {}

/// 将设备的 [offset, offset+len) 拆分为若干 chunk 局部范围。
pub fn split_range_into_chunks(layout: ChunkLayout, offset: u64, len: u64) -> Vec<ChunkSpan> {
    ChunkSpans::new(layout, offset, len).collect()
}
