//! Scribble sync server.
//!
//! Environment:
//! - `SCRIBBLE_BIND`: listen address (default `127.0.0.1:3000`)
//! - `PORT`: listen on `0.0.0.0:<PORT>` when `SCRIBBLE_BIND` is unset
//! - `SCRIBBLE_DATA_DIR`: room logs and checkpoints (default `data`)
//! - `SCRIBBLE_CHECKPOINT_INTERVAL`: commits between checkpoints (default 5)
//! - `RUST_LOG`: log filter (default `info`)

use log::info;
use scribble_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::default().apply_env(|key| std::env::var(key).ok());
    info!(
        "Starting Scribble server on {} (checkpoint every {} commits)",
        config.bind_addr, config.checkpoint_interval
    );

    SyncServer::new(config).run().await
}
