use chunkbd::chuck::chunk::DEFAULT_CHUNK_SIZE;
use chunkbd::config::{
    DEFAULT_STORE_URL, DEFAULT_TOTAL_LENGTH, DeviceConfig, StoreConfig, parse_base_url,
};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Serve the chunk store as a network block device
    Serve(ServeArgs),
    /// Print the chunk requests a byte range maps to
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
pub(crate) struct DeviceArgs {
    /// Virtual device length in bytes
    #[arg(long, env = "CHUNKBD_DISK_LENGTH", default_value_t = DEFAULT_TOTAL_LENGTH)]
    pub(crate) disk_length: u64,

    /// Bytes stored per chunk
    #[arg(long, env = "CHUNKBD_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub(crate) chunk_size: u64,
}

#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    #[command(flatten)]
    pub(crate) device: DeviceArgs,

    /// Base url of the chunk store
    #[arg(long, env = "CHUNKBD_STORE_URL", default_value = DEFAULT_STORE_URL)]
    pub(crate) store_url: String,

    /// `z` coordinate sent with every chunk request
    #[arg(
        long,
        env = "CHUNKBD_CHUNK_ROW",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    pub(crate) chunk_row: i64,

    /// Keep chunks in a local directory instead of the HTTP store
    #[arg(long, env = "CHUNKBD_LOCAL_DIR")]
    pub(crate) local_dir: Option<PathBuf>,

    /// Chunk store request timeout in seconds
    #[arg(long, env = "CHUNKBD_TIMEOUT_SECS", default_value_t = 30)]
    pub(crate) timeout_secs: u64,

    /// Chunk requests allowed in flight per device operation
    #[arg(long, env = "CHUNKBD_MAX_INFLIGHT", default_value_t = 1)]
    pub(crate) max_inflight: usize,

    /// NBD listening address
    #[arg(short, long, env = "CHUNKBD_LISTEN", default_value = "127.0.0.1:10809")]
    pub(crate) listen: String,

    /// Export name announced to clients
    #[arg(long, env = "CHUNKBD_EXPORT_NAME", default_value = "chunkbd")]
    pub(crate) export_name: String,

    /// Refuse writes from clients
    #[arg(long, env = "CHUNKBD_READ_ONLY")]
    pub(crate) read_only: bool,
}

#[derive(Args, Debug)]
pub(crate) struct PlanArgs {
    #[command(flatten)]
    pub(crate) device: DeviceArgs,

    /// Device offset of the range
    #[arg(long)]
    pub(crate) offset: u64,

    /// Length of the range
    #[arg(long)]
    pub(crate) length: u64,
}

pub(crate) enum Backend {
    Http(StoreConfig),
    LocalDir(PathBuf),
}

pub(crate) struct ServeConfig {
    pub(crate) device: DeviceConfig,
    pub(crate) backend: Backend,
    pub(crate) listen: SocketAddr,
    pub(crate) export_name: String,
    pub(crate) read_only: bool,
}

impl DeviceArgs {
    pub(crate) fn to_config(&self) -> Result<DeviceConfig, String> {
        DeviceConfig::new(self.disk_length, self.chunk_size).map_err(|e| e.to_string())
    }
}

/// Collects every configuration problem before giving up.
pub(crate) fn validate(args: &ServeArgs) -> Result<ServeConfig, Vec<String>> {
    let mut errors = Vec::new();

    let device = match args.device.to_config() {
        Ok(cfg) => Some(cfg.with_max_inflight(args.max_inflight)),
        Err(e) => {
            errors.push(e);
            None
        }
    };
    if args.max_inflight == 0 {
        errors.push("CHUNKBD_MAX_INFLIGHT must be at least 1".to_string());
    }
    if args.timeout_secs == 0 {
        errors.push("CHUNKBD_TIMEOUT_SECS must be at least 1".to_string());
    }

    let listen = match args.listen.parse::<SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(e) => {
            errors.push(format!("CHUNKBD_LISTEN `{}` is not a socket address: {e}", args.listen));
            None
        }
    };

    let backend = match &args.local_dir {
        Some(dir) => {
            if dir.exists() && !dir.is_dir() {
                errors.push(format!(
                    "CHUNKBD_LOCAL_DIR `{}` exists but is not a directory",
                    dir.display()
                ));
            }
            Some(Backend::LocalDir(dir.clone()))
        }
        None => match parse_base_url(&args.store_url) {
            Ok(url) => Some(Backend::Http(StoreConfig {
                base_url: url,
                row: args.chunk_row,
                timeout: Duration::from_secs(args.timeout_secs),
            })),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
    };

    match (device, backend, listen) {
        (Some(device), Some(backend), Some(listen)) if errors.is_empty() => Ok(ServeConfig {
            device,
            backend,
            listen,
            export_name: args.export_name.clone(),
            read_only: args.read_only,
        }),
        _ => Err(errors),
    }
}
