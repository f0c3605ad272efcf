// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker driving block schedule handlers.
//!
//! Fires on a cron schedule (hourly by default) and hands the current time to
//! every block instance. Run and task blocks use the tick to cancel
//! correlation records older than 24 hours. Each tick then deletes pending
//! events resolved, and events emitted, longer ago than the retention period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};

/// Default schedule: top of every hour, UTC.
pub const DEFAULT_SCHEDULE: &str = "0 * * * *";

/// Default retention for resolved host records.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Configuration for the reaper worker.
#[derive(Debug, Clone)]
pub struct ReaperWorkerConfig {
    /// Whether the worker runs at all.
    pub enabled: bool,
    /// Five-field cron expression.
    pub schedule: String,
    /// How long resolved pending events and emitted events are kept.
    pub retention: Duration,
}

impl Default for ReaperWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: DEFAULT_SCHEDULE.to_string(),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl ReaperWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SPACEFLOW_REAPER_ENABLED`: "false" or "0" to disable (default: true)
    /// - `SPACEFLOW_REAPER_SCHEDULE`: cron expression (default: `0 * * * *`)
    /// - `SPACEFLOW_REAPER_RETENTION_HOURS`: hours resolved records are kept (default: 168)
    pub fn from_env() -> Self {
        let enabled = std::env::var("SPACEFLOW_REAPER_ENABLED")
            .map(|v| !(v == "false" || v == "0"))
            .unwrap_or(true);

        let schedule = std::env::var("SPACEFLOW_REAPER_SCHEDULE")
            .unwrap_or_else(|_| DEFAULT_SCHEDULE.to_string());

        let retention = std::env::var("SPACEFLOW_REAPER_RETENTION_HOURS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|hours| Duration::from_secs(hours * 3600))
            .unwrap_or(DEFAULT_RETENTION);

        Self {
            enabled,
            schedule,
            retention,
        }
    }
}

/// Background worker that runs block schedule handlers.
pub struct ReaperWorker {
    dispatcher: Arc<Dispatcher>,
    config: ReaperWorkerConfig,
    cron: Cron,
    shutdown: Arc<Notify>,
}

impl ReaperWorker {
    /// Create a new reaper worker. Fails on an invalid cron expression.
    pub fn new(dispatcher: Arc<Dispatcher>, config: ReaperWorkerConfig) -> Result<Self> {
        let cron = Cron::new(&config.schedule).parse().map_err(|e| {
            Error::Other(format!(
                "Invalid reaper schedule '{}': {}",
                config.schedule, e
            ))
        })?;

        Ok(Self {
            dispatcher,
            config,
            cron,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// First scheduled time strictly after `after`.
    pub fn next_tick(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.find_next_occurrence(&after, false).ok()
    }

    /// Run the worker loop until the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Reaper worker disabled");
            return;
        }

        info!(schedule = %self.config.schedule, "Reaper worker started");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_tick(now) else {
                error!(schedule = %self.config.schedule, "No upcoming reaper tick, stopping");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next_tick = %next, "Reaper worker sleeping");

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Reaper worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(wait) => {
                    self.tick(Utc::now()).await;
                }
            }
        }

        info!("Reaper worker stopped");
    }

    /// Run every schedule handler once, then prune resolved host records.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let failed = self.dispatcher.run_schedules(now).await;
        if failed > 0 {
            warn!(failed = failed, "Some schedule handlers failed");
        }

        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);
        let before = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self.dispatcher.prune_events(before).await {
            Ok(0) => debug!("Reaper tick complete"),
            Ok(removed) => info!(removed = removed, "Pruned resolved host records"),
            Err(e) => error!(error = %e, "Failed to prune resolved host records"),
        }
    }
}
