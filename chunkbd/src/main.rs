mod cli;

use anyhow::{Context, bail};
use chunkbd::cadapter::client::ChunkClient;
use chunkbd::cadapter::http::HttpBackend;
use chunkbd::cadapter::localfs::LocalFsBackend;
use chunkbd::chuck::store::{ChunkStore, HttpChunkStore, LocalFsChunkStore};
use chunkbd::chuck::util::ChunkSpans;
use chunkbd::config::DeviceConfig;
use chunkbd::device::BlockDevice;
use chunkbd::nbd::NbdServer;
use clap::Parser;
use cli::{Backend, Cli, Command, PlanArgs, ServeArgs, ServeConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Plan(args) => plan(args),
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let cfg = match cli::validate(&args) {
        Ok(cfg) => cfg,
        Err(errors) => {
            eprintln!("{}", errors.join("\n"));
            std::process::exit(1);
        }
    };

    match &cfg.backend {
        Backend::Http(store_cfg) => {
            info!(url = %store_cfg.base_url, row = store_cfg.row, "using http chunk store");
            let store: HttpChunkStore = ChunkClient::new(HttpBackend::new(store_cfg)?);
            run(&cfg, store).await
        }
        Backend::LocalDir(dir) => {
            info!(dir = %dir.display(), "using local directory chunk store");
            let store: LocalFsChunkStore =
                ChunkClient::new(LocalFsBackend::new(dir, cfg.device.chunk_size()));
            run(&cfg, store).await
        }
    }
}

async fn run<S: ChunkStore + 'static>(cfg: &ServeConfig, store: S) -> anyhow::Result<()> {
    let device = Arc::new(BlockDevice::new(cfg.device, store));
    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("cannot listen on {}", cfg.listen))?;
    info!(
        addr = %listener.local_addr()?,
        size = cfg.device.total_length,
        chunk_size = cfg.device.chunk_size(),
        chunks = cfg.device.chunk_count(),
        read_only = cfg.read_only,
        "serving nbd export `{}`",
        cfg.export_name
    );
    NbdServer::new(device, cfg.export_name.clone(), cfg.read_only)
        .serve(listener, shutdown_signal())
        .await?;
    Ok(())
}

fn plan(args: PlanArgs) -> anyhow::Result<()> {
    let cfg: DeviceConfig = args.device.to_config().map_err(anyhow::Error::msg)?;
    if !cfg.contains(args.offset, args.length) {
        bail!(
            "range {}+{} is outside the device ({} bytes)",
            args.offset,
            args.length,
            cfg.total_length
        );
    }
    for (i, sp) in ChunkSpans::new(cfg.layout, args.offset, args.length).enumerate() {
        println!(
            "{i:>4}  chunk {:<8} offset {:<8} length {:<8} device {}",
            sp.chunk_index,
            sp.offset_in_chunk,
            sp.len,
            sp.device_offset(cfg.layout)
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}
