//! Chunk 布局：定长 chunk 的索引/偏移换算。
//!
//! 虚拟设备的地址空间按 `chunk_size` 切分，第 i 个 chunk 覆盖
//! `[i * chunk_size, (i + 1) * chunk_size)`，最后一个 chunk 可能不满。

/// 默认部署下每个 chunk 可存放的字节数。
pub const DEFAULT_CHUNK_SIZE: u64 = 3064;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: u64,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkLayout {
    pub fn new(chunk_size: u64) -> Self {
        debug_assert!(chunk_size > 0, "chunk_size must be positive");
        Self { chunk_size }
    }

    #[inline]
    pub fn chunk_index_of(&self, offset: u64) -> u64 {
        offset / self.chunk_size
    }

    #[inline]
    pub fn within_chunk_offset(&self, offset: u64) -> u64 {
        offset % self.chunk_size
    }

    /// chunk 起始处在设备上的偏移。
    #[inline]
    pub fn chunk_start(&self, chunk_index: u64) -> u64 {
        chunk_index * self.chunk_size
    }

    /// 覆盖 `total_length` 字节所需的 chunk 数（向上取整）。
    pub fn chunk_count(&self, total_length: u64) -> u64 {
        total_length.div_ceil(self.chunk_size)
    }

    /// 设备长度为 `total_length` 时第 `chunk_index` 个 chunk 的实际可用长度。
    pub fn chunk_len(&self, chunk_index: u64, total_length: u64) -> u64 {
        let start = self.chunk_start(chunk_index);
        if start >= total_length {
            return 0;
        }
        (total_length - start).min(self.chunk_size)
    }
}
