//! datashare node
//!
//! Serves the HTTP API, joins UDP discovery and keeps the shared snapshot in
//! sync until interrupted.
//!
//! # Configuration
//!
//! Read from `~/.config/datashare/config.yaml` (or `DATASHARE_CONFIG`), with
//! `DATASHARE_*` environment variables taking precedence:
//!
//! ```yaml
//! data_dir: /var/lib/datashare
//! shared_path: /mnt/office-share/datashare
//! port: 3001
//! mode: master
//! peers:
//!   - 192.168.1.20:3001
//! ```

use datashare::config::ServerConfig;
use datashare::DataSharingServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datashare=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::load(None) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.data_dir.value) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Data directory: {}", config.data_dir.value.display());
    match &config.config_file {
        Some(path) => tracing::info!("Config file: {}", path.display()),
        None => tracing::info!("No config file, using defaults and environment"),
    }

    let server = DataSharingServer::new(config);
    if let Err(e) = server.start().await {
        tracing::error!("Failed to start: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
    server.stop().await;
}
