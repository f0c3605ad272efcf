// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for spaceflow-server.
//!
//! [`ServerRuntime`] hosts the configured block instances, provisions the
//! Spacelift webhook and notification policy, serves the HTTP surface and
//! runs the webhook and reaper workers.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spaceflow_host::sqlite::SqliteStore;
//! use spaceflow_server::runtime::ServerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::from_path(".data/spaceflow.db").await?);
//!
//!     let runtime = ServerRuntime::builder()
//!         .store(store)
//!         .app_config(app_config)
//!         .blocks(blocks)
//!         .bind_addr("0.0.0.0:8080".parse()?)
//!         .public_url("https://flows.example.com/webhook")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use spaceflow_client::{AppConfig, SpaceliftClient};
use spaceflow_host::{EventSink, KvNamespace, KvStore};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::BlockSpec;
use crate::dispatcher::Dispatcher;
use crate::http::{AppState, router};
use crate::provisioner::{AppStatus, Provisioner};
use crate::reaper::{ReaperWorker, ReaperWorkerConfig};
use crate::webhook_queue;

/// Builder for creating a [`ServerRuntime`].
pub struct ServerRuntimeBuilder {
    kv_store: Option<Arc<dyn KvStore>>,
    event_sink: Option<Arc<dyn EventSink>>,
    app_config: Option<AppConfig>,
    blocks: Vec<BlockSpec>,
    bind_addr: SocketAddr,
    public_url: Option<String>,
    installation_url: Option<String>,
    provision: bool,
    reaper_config: ReaperWorkerConfig,
}

impl Default for ServerRuntimeBuilder {
    fn default() -> Self {
        Self {
            kv_store: None,
            event_sink: None,
            app_config: None,
            blocks: Vec::new(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            public_url: None,
            installation_url: None,
            provision: true,
            reaper_config: ReaperWorkerConfig::from_env(),
        }
    }
}

impl ServerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one backend for both KV and events (e.g. `SqliteStore`).
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: KvStore + EventSink + 'static,
    {
        self.kv_store = Some(store.clone());
        self.event_sink = Some(store);
        self
    }

    /// Set the KV store (required unless [`store`](Self::store) is used).
    pub fn kv_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Set the event sink (required unless [`store`](Self::store) is used).
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Set the installation configuration (required).
    pub fn app_config(mut self, config: AppConfig) -> Self {
        self.app_config = Some(config);
        self
    }

    /// Set the hosted block instances.
    ///
    /// Default: none
    pub fn blocks(mut self, blocks: Vec<BlockSpec>) -> Self {
        self.blocks = blocks;
        self
    }

    /// Set the HTTP bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the webhook URL registered with Spacelift.
    ///
    /// Default: `http://localhost:<port>/webhook`, using the port actually
    /// bound.
    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Set the installation URL used in display names.
    ///
    /// Default: the public URL
    pub fn installation_url(mut self, url: impl Into<String>) -> Self {
        self.installation_url = Some(url.into());
        self
    }

    /// Whether to provision the webhook and policy on start.
    ///
    /// Default: `true`
    pub fn provision(mut self, provision: bool) -> Self {
        self.provision = provision;
        self
    }

    /// Set the reaper worker configuration.
    ///
    /// Default: Loaded from environment variables via [`ReaperWorkerConfig::from_env()`].
    pub fn reaper_config(mut self, config: ReaperWorkerConfig) -> Self {
        self.reaper_config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ServerRuntimeConfig> {
        let kv_store = self
            .kv_store
            .ok_or_else(|| anyhow::anyhow!("kv_store is required"))?;
        let event_sink = self
            .event_sink
            .ok_or_else(|| anyhow::anyhow!("event_sink is required"))?;
        let app_config = self
            .app_config
            .ok_or_else(|| anyhow::anyhow!("app_config is required"))?;

        Ok(ServerRuntimeConfig {
            kv_store,
            event_sink,
            app_config,
            blocks: self.blocks,
            bind_addr: self.bind_addr,
            public_url: self.public_url,
            installation_url: self.installation_url,
            provision: self.provision,
            reaper_config: self.reaper_config,
        })
    }
}

/// Configuration for a [`ServerRuntime`].
pub struct ServerRuntimeConfig {
    kv_store: Arc<dyn KvStore>,
    event_sink: Arc<dyn EventSink>,
    app_config: AppConfig,
    blocks: Vec<BlockSpec>,
    bind_addr: SocketAddr,
    public_url: Option<String>,
    installation_url: Option<String>,
    provision: bool,
    reaper_config: ReaperWorkerConfig,
}

impl ServerRuntimeConfig {
    /// Start the runtime: bind, provision, then spawn the HTTP server and
    /// the webhook and reaper workers.
    pub async fn start(self) -> Result<ServerRuntime> {
        let client = SpaceliftClient::new(KvNamespace::app(self.kv_store.clone()))?;

        let dispatcher = Arc::new(Dispatcher::new(
            self.app_config.clone(),
            self.kv_store.clone(),
            self.event_sink.clone(),
            client.clone(),
            &self.blocks,
        )?);

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;

        let public_url = self
            .public_url
            .unwrap_or_else(|| format!("http://localhost:{}/webhook", bind_addr.port()));
        let installation_url = self.installation_url.unwrap_or_else(|| public_url.clone());

        let (webhooks, webhook_worker) =
            webhook_queue::webhook_queue(dispatcher.clone(), webhook_queue::DEFAULT_CAPACITY);
        let state = AppState::new(dispatcher.clone(), webhooks);

        let provisioner = Arc::new(Provisioner::new(
            client,
            dispatcher.app_kv(),
            self.app_config,
            public_url.clone(),
            installation_url,
        ));

        if self.provision {
            let status = provisioner.sync().await;
            *state.status.write().await = status;
        } else {
            debug!("Provisioning disabled; webhook and policy are not reconciled");
        }

        // Create reaper worker
        let reaper_enabled = self.reaper_config.enabled;
        let reaper = ReaperWorker::new(dispatcher.clone(), self.reaper_config)?;
        let reaper_shutdown = reaper.shutdown_handle();

        let reaper_handle = tokio::spawn(async move {
            reaper.run().await;
        });

        // Create webhook worker
        let webhook_shutdown = webhook_worker.shutdown_handle();
        let webhook_handle = tokio::spawn(async move {
            webhook_worker.run().await;
        });

        // Start HTTP server task
        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let app = router(state.clone());

        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown_rx.changed().await;
                })
                .await
                .map_err(anyhow::Error::from)
        });

        info!(
            bind_addr = %bind_addr,
            public_url = %public_url,
            block_count = self.blocks.len(),
            "ServerRuntime started"
        );

        Ok(ServerRuntime {
            server_handle,
            webhook_handle,
            reaper_handle,
            server_shutdown_tx,
            webhook_shutdown,
            reaper_shutdown,
            reaper_enabled,
            provisioner,
            state,
            bind_addr,
            public_url,
        })
    }
}

/// A running spaceflow server that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ServerRuntime {
    server_handle: JoinHandle<Result<()>>,
    webhook_handle: JoinHandle<()>,
    reaper_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    webhook_shutdown: Arc<Notify>,
    reaper_shutdown: Arc<Notify>,
    reaper_enabled: bool,
    provisioner: Arc<Provisioner>,
    state: AppState,
    bind_addr: SocketAddr,
    public_url: String,
}

impl ServerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ServerRuntimeBuilder {
        ServerRuntimeBuilder::new()
    }

    /// Get the address the HTTP server is bound to.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Get the webhook URL registered with Spacelift.
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Get the shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Status of the last installation sync.
    pub async fn status(&self) -> AppStatus {
        self.state.status.read().await.clone()
    }

    /// Re-run installation sync and record the result.
    pub async fn sync(&self) -> AppStatus {
        let status = self.provisioner.sync().await;
        *self.state.status.write().await = status.clone();
        status
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the HTTP server first, then lets the webhook worker dispatch
    /// every payload already acknowledged, then stops the reaper.
    pub async fn shutdown(self) -> Result<()> {
        info!("ServerRuntime shutting down...");

        // Signal server shutdown and wait for in-flight requests
        let _ = self.server_shutdown_tx.send(true);
        let server_result = match self.server_handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("ServerRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("ServerRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        };

        // Drain accepted webhooks
        self.webhook_shutdown.notify_one();
        if let Err(e) = self.webhook_handle.await {
            error!("Webhook worker task panicked: {}", e);
        }

        // Signal reaper shutdown
        self.reaper_shutdown.notify_one();
        if let Err(e) = self.reaper_handle.await {
            error!("Reaper worker task panicked: {}", e);
        }

        if server_result.is_ok() {
            info!("ServerRuntime shutdown complete");
        }
        server_result
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        let reaper_running = !self.reaper_enabled || !self.reaper_handle.is_finished();

        !self.server_handle.is_finished() && !self.webhook_handle.is_finished() && reaper_running
    }
}
