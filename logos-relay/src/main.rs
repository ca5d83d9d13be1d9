//! logos-relay server binary.
//!
//! Usage: `logos-relay [config.toml]`
//!
//! Environment overrides: `PORT` / `WS_PORT`, `YJS_AUTH_SECRET`,
//! `RELAY_AUTH_MODE`, `RELAY_ALLOWED_ORIGINS`, `RELAY_ENV`.
//! Log level via `RUST_LOG` (defaults to `info`).

use std::path::PathBuf;

use log::{error, info};
use logos_relay::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match ServerConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    info!("Starting Logos relay on {}...", config.bind_addr);
    let server = SyncServer::new(config);
    if let Err(e) = server.run().await {
        error!("Relay server stopped: {e}");
        std::process::exit(1);
    }
}
