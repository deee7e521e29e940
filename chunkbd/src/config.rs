//! Device and chunk store configuration.
//!
//! Values come from the command line (see `cli`) and are validated once at
//! startup; afterwards the structs are shared read-only.

use crate::chuck::chunk::{ChunkLayout, DEFAULT_CHUNK_SIZE};
use crate::error::ConfigError;
use reqwest::Url;
use std::time::Duration;

pub const DEFAULT_TOTAL_LENGTH: u64 = 10_000;
pub const DEFAULT_STORE_URL: &str = "http://localhost:8394/";

/// Geometry of the virtual device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub total_length: u64,
    pub layout: ChunkLayout,
    /// Chunk requests allowed in flight within one operation; 1 keeps them strictly sequential.
    pub max_inflight: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            total_length: DEFAULT_TOTAL_LENGTH,
            layout: ChunkLayout::new(DEFAULT_CHUNK_SIZE),
            max_inflight: 1,
        }
    }
}

impl DeviceConfig {
    pub fn new(total_length: u64, chunk_size: u64) -> Result<Self, ConfigError> {
        let cfg = Self {
            total_length,
            layout: ChunkLayout { chunk_size },
            max_inflight: 1,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight.max(1);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.total_length == 0 {
            errors.push("device length must be greater than zero".to_string());
        }
        if self.layout.chunk_size == 0 {
            errors.push("chunk size must be greater than zero".to_string());
        }
        // The chunk store parses offsets and lengths as 32-bit signed integers.
        if self.layout.chunk_size > i32::MAX as u64 {
            errors.push(format!(
                "chunk size {} exceeds {} bytes",
                self.layout.chunk_size,
                i32::MAX
            ));
        }
        // So is the chunk index.
        if self.layout.chunk_size > 0 && self.chunk_count() > i32::MAX as u64 + 1 {
            errors.push(format!(
                "device of {} bytes needs {} chunks, more than {} are addressable",
                self.total_length,
                self.chunk_count(),
                i32::MAX as u64 + 1
            ));
        }
        if self.max_inflight == 0 {
            errors.push("max in-flight requests must be at least 1".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.layout.chunk_size
    }

    pub fn chunk_count(&self) -> u64 {
        self.layout.chunk_count(self.total_length)
    }

    /// Checks `offset + length <= total_length` without overflowing.
    pub fn contains(&self, offset: u64, length: u64) -> bool {
        offset
            .checked_add(length)
            .is_some_and(|end| end <= self.total_length)
    }
}

/// Where and how to reach the chunk store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub base_url: Url,
    /// `z` coordinate of every chunk; the chunk index is sent as `x`.
    pub row: i64,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(base_url: &str, row: i64, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            row,
            timeout,
        })
    }
}

/// Parses the store base url, making sure endpoints are joined below its path.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigError::Url {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Url {
            url: raw.to_string(),
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
