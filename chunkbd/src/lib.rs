// Library crate for chunkbd: re-export internal modules for the binary and tests.

pub mod cadapter;
pub mod chuck;
pub mod config;
pub mod device;
pub mod error;
pub mod nbd;

pub use chuck::chunk::ChunkLayout;
pub use chuck::util::{ChunkSpan, split_range_into_chunks};
pub use config::{DeviceConfig, StoreConfig};
pub use device::{BlockDevice, DeviceHandle, ZeroFlags};
pub use error::{DeviceError, StoreError};
