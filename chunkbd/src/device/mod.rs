//! Block device adapter
//!
//! Exposes the virtual device to a block protocol host: `open`/`close`,
//! `size`, `read`, `write`, `zero` and `flush`. Every range is bounds-checked
//! before any chunk request is issued; the actual chunk traffic is delegated
//! to [`ChunkReader`]/[`ChunkWriter`].
//!
//! Operations are independent of each other. No ordering is imposed between
//! concurrent operations touching the same bytes.

use crate::chuck::reader::ChunkReader;
use crate::chuck::store::ChunkStore;
use crate::chuck::writer::ChunkWriter;
use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error};

/// Session token returned by [`BlockDevice::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    id: u64,
    read_only: bool,
}

impl DeviceHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Flags accompanying a zero request. They only affect how the host may
/// expect the request to be carried out, never the resulting bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ZeroFlags {
    pub may_trim: bool,
    pub fua: bool,
}

pub struct BlockDevice<S: ChunkStore> {
    config: DeviceConfig,
    store: S,
    next_handle: AtomicU64,
    open_handles: Mutex<HashSet<u64>>,
}

impl<S: ChunkStore> BlockDevice<S> {
    pub fn new(config: DeviceConfig, store: S) -> Self {
        Self {
            config,
            store,
            next_handle: AtomicU64::new(1),
            open_handles: Mutex::new(HashSet::new()),
        }
    }

    /// Bookkeeping only; no chunk store traffic.
    pub fn open(&self, read_only: bool) -> DeviceHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.open_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        debug!(handle = id, read_only, "device opened");
        DeviceHandle { id, read_only }
    }

    pub fn close(&self, handle: DeviceHandle) {
        let removed = self
            .open_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id);
        debug!(handle = handle.id, removed, "device closed");
    }

    pub fn size(&self) -> u64 {
        self.config.total_length
    }

    pub fn open_count(&self) -> usize {
        self.open_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn check(&self, handle: DeviceHandle, offset: u64, length: u64) -> DeviceResult<()> {
        let known = self
            .open_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&handle.id);
        if !known {
            return Err(DeviceError::UnknownHandle(handle.id));
        }
        if !self.config.contains(offset, length) {
            return Err(DeviceError::InvalidRange {
                offset,
                length,
                size: self.config.total_length,
            });
        }
        Ok(())
    }

    fn check_writable(&self, handle: DeviceHandle, offset: u64, length: u64) -> DeviceResult<()> {
        self.check(handle, offset, length)?;
        if handle.is_read_only() {
            return Err(DeviceError::ReadOnly(handle.id));
        }
        Ok(())
    }

    fn reader(&self) -> ChunkReader<'_, S> {
        ChunkReader::new(self.config.layout, &self.store).max_inflight(self.config.max_inflight)
    }

    fn writer(&self) -> ChunkWriter<'_, S> {
        ChunkWriter::new(self.config.layout, &self.store).max_inflight(self.config.max_inflight)
    }

    /// Returns exactly `length` bytes starting at device offset `offset`.
    pub async fn read(&self, handle: DeviceHandle, offset: u64, length: usize) -> DeviceResult<Vec<u8>> {
        self.check(handle, offset, length as u64)?;
        debug!(handle = handle.id, offset, length, "read");
        self.reader()
            .read(offset, length)
            .await
            .inspect_err(|e| error!(offset, length, "read failed: {e}"))
    }

    /// Writes `data` at `offset`. A failure leaves the chunks written so far
    /// in place.
    pub async fn write(&self, handle: DeviceHandle, offset: u64, data: &[u8]) -> DeviceResult<()> {
        self.check_writable(handle, offset, data.len() as u64)?;
        debug!(handle = handle.id, offset, length = data.len(), "write");
        self.writer()
            .write(offset, data)
            .await
            .inspect_err(|e| error!(offset, length = data.len(), "write failed: {e}"))
    }

    /// Same observable result as writing `count` zero bytes at `offset`.
    pub async fn zero(
        &self,
        handle: DeviceHandle,
        offset: u64,
        count: u64,
        flags: ZeroFlags,
    ) -> DeviceResult<()> {
        self.check_writable(handle, offset, count)?;
        debug!(handle = handle.id, offset, count, ?flags, "zero");
        self.writer()
            .write_zeroes(offset, count)
            .await
            .inspect_err(|e| error!(offset, count, "zero failed: {e}"))
    }

    /// Every successful chunk write is already durable, so there is nothing to flush.
    pub async fn flush(&self, handle: DeviceHandle) -> DeviceResult<()> {
        self.check(handle, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ChunkClient;
    use crate::cadapter::localfs::LocalFsBackend;
    use crate::chuck::chunk::ChunkLayout;
    use crate::chuck::store::{InMemoryChunkStore, StoreOp};
    use crate::chuck::util::ChunkSpan;
    use std::sync::Arc;

    fn device(total: u64, chunk: u64) -> (BlockDevice<Arc<InMemoryChunkStore>>, Arc<InMemoryChunkStore>) {
        let cfg = DeviceConfig::new(total, chunk).unwrap();
        let store = Arc::new(InMemoryChunkStore::new(ChunkLayout::new(chunk)));
        (BlockDevice::new(cfg, store.clone()), store)
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[tokio::test]
    async fn test_size_and_open_do_no_io() {
        let (dev, store) = device(65536, 3064);
        let h = dev.open(false);
        assert_eq!(dev.size(), 65536);
        assert_eq!(dev.open_count(), 1);
        dev.close(h);
        assert_eq!(dev.open_count(), 0);
        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn test_read_single_chunk_issues_one_request() {
        let (dev, store) = device(65536, 3064);
        let h = dev.open(true);
        let out = dev.read(h, 0, 100).await.unwrap();
        assert_eq!(out, vec![0u8; 100]);
        assert_eq!(
            store.ops(),
            vec![StoreOp::Read(ChunkSpan {
                chunk_index: 0,
                offset_in_chunk: 0,
                len: 100
            })]
        );
    }

    #[tokio::test]
    async fn test_write_read_coherence_over_many_ranges() {
        let (dev, _store) = device(10_000, 3064);
        let h = dev.open(false);
        let ranges = [(0u64, 1usize), (3063, 2), (3000, 200), (100, 6128), (9000, 1000), (0, 10_000)];
        for (i, (offset, len)) in ranges.into_iter().enumerate() {
            let data = pattern(len, i as u8);
            dev.write(h, offset, &data).await.unwrap();
            assert_eq!(dev.read(h, offset, len).await.unwrap(), data, "range {offset}+{len}");
        }
    }

    #[tokio::test]
    async fn test_write_does_not_touch_neighbours() {
        let (dev, _store) = device(100, 8);
        let h = dev.open(false);
        dev.write(h, 0, &[0xee; 100]).await.unwrap();
        dev.write(h, 13, &pattern(30, 1)).await.unwrap();
        let all = dev.read(h, 0, 100).await.unwrap();
        assert!(all[..13].iter().all(|&b| b == 0xee));
        assert_eq!(&all[13..43], &pattern(30, 1)[..]);
        assert!(all[43..].iter().all(|&b| b == 0xee));
    }

    #[tokio::test]
    async fn test_zero_reads_back_zeros() {
        let (dev, _store) = device(65536, 3064);
        let h = dev.open(false);
        dev.write(h, 0, &[0x5a; 65536]).await.unwrap();
        dev.zero(h, 2999, 7000, ZeroFlags::default()).await.unwrap();
        assert_eq!(dev.read(h, 2999, 7000).await.unwrap(), vec![0u8; 7000]);
        assert_eq!(dev.read(h, 2998, 1).await.unwrap(), vec![0x5a]);
        assert_eq!(dev.read(h, 9999, 1).await.unwrap(), vec![0x5a]);
    }

    #[tokio::test]
    async fn test_repeated_write_is_idempotent() {
        let (dev, _store) = device(20_000, 3064);
        let h = dev.open(false);
        let data = pattern(7777, 3);
        dev.write(h, 1234, &data).await.unwrap();
        let once = dev.read(h, 0, 20_000).await.unwrap();
        dev.write(h, 1234, &data).await.unwrap();
        assert_eq!(dev.read(h, 0, 20_000).await.unwrap(), once);
    }

    #[tokio::test]
    async fn test_out_of_range_rejected_before_io() {
        let (dev, store) = device(1000, 64);
        let h = dev.open(false);
        let err = dev.read(h, 990, 11).await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidRange { offset: 990, length: 11, size: 1000 }));
        assert_eq!(err.errno(), libc::EINVAL);
        assert!(dev.write(h, u64::MAX, &[1]).await.is_err());
        assert!(dev.zero(h, 1001, 0, ZeroFlags::default()).await.is_err());
        assert!(store.ops().is_empty());

        // 恰好到设备末尾是合法的
        dev.write(h, 999, &[1]).await.unwrap();
        assert!(dev.read(h, 1000, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_and_closed_handles() {
        let (dev, store) = device(1000, 64);
        let ro = dev.open(true);
        assert!(ro.is_read_only());
        assert!(!dev.open(false).is_read_only());
        let err = dev.write(ro, 0, &[1]).await.unwrap_err();
        assert_eq!(err.errno(), libc::EPERM);
        assert!(dev.zero(ro, 0, 10, ZeroFlags::default()).await.is_err());
        assert!(dev.read(ro, 0, 10).await.is_ok());

        dev.close(ro);
        assert!(matches!(
            dev.read(ro, 0, 10).await.unwrap_err(),
            DeviceError::UnknownHandle(_)
        ));
        assert!(dev.flush(ro).await.is_err());
        // 只有一次成功的读
        assert_eq!(store.ops().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_fails_operation() {
        let (dev, store) = device(1000, 64);
        let h = dev.open(false);
        store.fail_on_chunk(3);
        let err = dev.write(h, 100, &[7u8; 300]).await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
        assert!(matches!(err, DeviceError::Store { chunk_index: 3, .. }));

        store.heal();
        let out = dev.read(h, 100, 300).await.unwrap();
        // chunk 1、2 已写入，chunk 3 之后保持原样
        assert!(out[..92].iter().all(|&b| b == 7));
        assert!(out[92..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_parallel_tiles_same_result() {
        let cfg = DeviceConfig::new(50_000, 3064).unwrap().with_max_inflight(8);
        let store = InMemoryChunkStore::new(cfg.layout);
        let dev = BlockDevice::new(cfg, store);
        let h = dev.open(false);
        let data = pattern(40_000, 9);
        dev.write(h, 777, &data).await.unwrap();
        assert_eq!(dev.read(h, 777, 40_000).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_device_over_localfs() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = DeviceConfig::new(65536, 3064).unwrap();
        let store = ChunkClient::new(LocalFsBackend::new(tmp.path(), cfg.chunk_size()));
        let dev = BlockDevice::new(cfg, store);
        let h = dev.open(false);
        let data = pattern(65536, 11);
        dev.write(h, 0, &data).await.unwrap();
        assert_eq!(dev.read(h, 0, 65536).await.unwrap(), data);
        assert_eq!(std::fs::read_dir(tmp.path().join("chunks")).unwrap().count(), 22);
    }
}
