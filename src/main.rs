//! RedVault Server Binary
//!
//! Main entry point for the RedVault TCP server

use clap::Parser;
use redvault::{Result, RedVaultServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// RedVault server
#[derive(Parser, Debug)]
#[command(name = "redvault-server")]
#[command(about = "In-memory key-value server with pub/sub and an append-only file")]
#[command(version)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long)]
    bind: Option<String>,

    /// Append-only file path
    #[arg(short, long)]
    aof: Option<String>,

    /// Maximum concurrent connections
    #[arg(short, long)]
    max_connections: Option<usize>,

    /// Milliseconds between background fsyncs of the append-only file
    #[arg(long)]
    fsync_interval_ms: Option<u64>,

    /// Start from the valid prefix of a truncated append-only file
    #[arg(long)]
    aof_load_truncated: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(aof) = self.aof {
            config.aof_path = aof;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(interval) = self.fsync_interval_ms {
            config.fsync_interval_ms = interval;
        }
        config.aof_load_truncated |= self.aof_load_truncated;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,redvault=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let config = Args::parse().into_config()?;
    info!(
        bind = %config.bind_addr,
        aof = %config.aof_path,
        max_connections = config.max_connections,
        "starting RedVault v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = match RedVaultServer::new(config).await {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!(error = %e, "failed to load state");
            return Err(e);
        }
    };

    // Graceful shutdown on SIGINT (Ctrl+C)
    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            return;
        }

        info!("received Ctrl+C, initiating graceful shutdown");
        if let Err(e) = server_clone.shutdown() {
            error!(error = %e, "failed to initiate shutdown");
        }
    });

    server.run().await
}
