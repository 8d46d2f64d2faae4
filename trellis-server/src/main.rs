//! Trellis board server.
//!
//! Configured from `TRELLIS_*` environment variables; logging follows
//! `RUST_LOG` (default `info`).

use log::info;
use trellis_sync::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;
    info!("Starting Trellis (board '{}')...", config.board_key);
    match &config.storage_path {
        Some(path) => info!("Persisting snapshots under {}", path.display()),
        None => info!("No storage path set, board lives in memory only"),
    }

    let server = SyncServer::new(config).await?;
    let handle = server.start().await?;
    info!("Board sync at {}", handle.ws_url());
    if let Some(url) = handle.http_url() {
        info!("HTTP API at {url}");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
