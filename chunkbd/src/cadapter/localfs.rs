//! 本地文件目录后端，用于 mock chunk 存储（实现 ChunkBackend）。
//!
//! 每个 chunk 对应 `{root}/chunks/{chunk_index}` 一个文件；未写入的部分读出为 0。

use crate::cadapter::client::{ChunkBackend, ChunkRequest};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};

pub struct LocalFsBackend {
    root: PathBuf,
    chunk_size: u64,
    // 写持有写锁完成整个读-改-写；读持有读锁，不会看到被截断的文件。
    lock: RwLock<()>,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P, chunk_size: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            chunk_size,
            lock: RwLock::new(()),
        }
    }

    fn path_for(&self, chunk_index: u64) -> PathBuf {
        self.root.join("chunks").join(chunk_index.to_string())
    }

    /// 计算请求覆盖的 [start, end)，越过 chunk 边界时报错。
    fn bounds(&self, req: &ChunkRequest, len: Option<u64>) -> StoreResult<(usize, usize)> {
        let start = req.start();
        let len = len.unwrap_or_else(|| self.chunk_size.saturating_sub(start));
        match start.checked_add(len) {
            Some(end) if end <= self.chunk_size => Ok((start as usize, end as usize)),
            _ => Err(StoreError::OutOfChunk {
                offset: start,
                len: len as usize,
                chunk_size: self.chunk_size,
            }),
        }
    }

    async fn load(&self, chunk_index: u64) -> StoreResult<Vec<u8>> {
        match fs::read(self.path_for(chunk_index)).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ChunkBackend for LocalFsBackend {
    async fn read_chunk(&self, req: &ChunkRequest) -> StoreResult<Vec<u8>> {
        let (start, end) = self.bounds(req, req.length)?;
        let buf = {
            let _guard = self.lock.read().await;
            self.load(req.chunk_index).await?
        };
        let mut out = vec![0u8; end - start];
        let copy_end = end.min(buf.len());
        if copy_end > start {
            out[..(copy_end - start)].copy_from_slice(&buf[start..copy_end]);
        }
        Ok(out)
    }

    async fn write_chunk(&self, req: &ChunkRequest, data: &[u8]) -> StoreResult<()> {
        let (start, end) = self.bounds(req, Some(data.len() as u64))?;
        let _guard = self.lock.write().await;
        let mut buf = self.load(req.chunk_index).await?;
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);

        let path = self.path_for(req.chunk_index);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut f = fs::File::create(path).await?;
        f.write_all(&buf).await?;
        f.flush().await?;
        Ok(())
    }
}
