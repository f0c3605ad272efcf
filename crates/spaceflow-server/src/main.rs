// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spaceflow Server - Spacelift Integration Host
//!
//! An HTTP server responsible for:
//! - Receiving signed Spacelift webhook notifications
//! - Provisioning the webhook and notification policy on start
//! - Hosting the configured automation blocks
//! - Reaping stale run/task correlations hourly

use std::sync::Arc;
use tracing::{info, warn};

use spaceflow_host::sqlite::SqliteStore;
use spaceflow_server::config::Config;
use spaceflow_server::provisioner::AppStatus;
use spaceflow_server::runtime::ServerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spaceflow_server=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        public_url = %config.public_url,
        database_path = %config.database_path.display(),
        block_count = config.blocks.len(),
        "Starting Spaceflow Server"
    );

    // Open database
    let store = Arc::new(SqliteStore::from_path(&config.database_path).await?);

    info!("Database ready");

    // Start the runtime
    let runtime = ServerRuntime::builder()
        .store(store)
        .app_config(config.app_config)
        .blocks(config.blocks)
        .bind_addr(config.http_addr)
        .public_url(&config.public_url)
        .installation_url(&config.installation_url)
        .build()?
        .start()
        .await?;

    match runtime.status().await {
        AppStatus::Failed(description) => {
            warn!(description = %description, "Installation is not ready")
        }
        status => info!(status = ?status, "Installation synced"),
    }

    info!(addr = %runtime.bind_addr(), "Spaceflow server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Spaceflow Server shut down");

    Ok(())
}
