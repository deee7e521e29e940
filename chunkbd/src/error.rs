use thiserror::Error;

/// Failure of a single chunk-store request.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("chunk store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("chunk store answered {status} for {endpoint}: {body}")]
    Status {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("chunk payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("chunk payload has {actual} bytes, expected {expected}")]
    ShortPayload { expected: usize, actual: usize },

    #[error("range {offset}+{len} does not fit in a chunk of {chunk_size} bytes")]
    OutOfChunk {
        offset: u64,
        len: usize,
        chunk_size: u64,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Injected(String),
}

impl StoreError {
    /// Transport failures and bad statuses, as opposed to payload problems.
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::Transport(_) | StoreError::Status { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            StoreError::Decode(_) | StoreError::ShortPayload { .. }
        )
    }
}

/// Result of a block device operation.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("range {offset}+{length} is outside the device ({size} bytes)")]
    InvalidRange { offset: u64, length: u64, size: u64 },

    #[error("device handle {0} was opened read-only")]
    ReadOnly(u64),

    #[error("unknown device handle {0}")]
    UnknownHandle(u64),

    #[error("chunk {chunk_index}: {source}")]
    Store {
        chunk_index: u64,
        #[source]
        source: StoreError,
    },
}

impl DeviceError {
    /// errno reported to block protocol clients.
    pub fn errno(&self) -> i32 {
        match self {
            DeviceError::InvalidRange { .. } | DeviceError::UnknownHandle(_) => libc::EINVAL,
            DeviceError::ReadOnly(_) => libc::EPERM,
            DeviceError::Store { .. } => libc::EIO,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),

    #[error("invalid chunk store url `{url}`: {reason}")]
    Url { url: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum NbdError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),
}
