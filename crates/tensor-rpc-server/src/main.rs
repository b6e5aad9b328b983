//! Tensor RPC Server - serves the host backend to remote clients.
//!
//! Binds a TCP port, prints `RPC_PORT=<port>` on stdout once listening, and
//! runs until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tensor_rpc::{HostBackend, RpcServer, ServerConfig};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const MIB: u64 = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "tensor-rpc-server")]
#[command(about = "Remote tensor backend server")]
struct Args {
    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend memory budget in MiB
    #[arg(short, long, default_value_t = tensor_rpc::RpcConfig::DEFAULT_HOST_MEMORY / MIB)]
    mem: u64,

    /// JSON settings file; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug when set
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Tensor RPC Server");

    let config = args.server_config()?;
    let total_memory = args
        .mem
        .checked_mul(MIB)
        .context("--mem is too large")?;
    let backend = Arc::new(HostBackend::new(total_memory));
    info!("Host backend memory: {} MiB", args.mem);

    let mut handle = RpcServer::start(config, backend).await?;

    // Print port for the launching process to read (intentional stdout)
    println!("RPC_PORT={}", handle.port);

    info!("RPC server running on {}", handle.addr());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}
