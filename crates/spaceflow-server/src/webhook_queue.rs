// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ordered hand-off of verified webhook payloads to the dispatcher.
//!
//! The HTTP handler enqueues a payload before acknowledging it; a single
//! worker drains the queue, so payloads reach the blocks in the order they
//! were accepted. On shutdown the queue is closed and every payload already
//! accepted is still dispatched.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};

/// Payloads buffered before the webhook handler waits for the worker.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Create a queue feeding `dispatcher`.
pub fn webhook_queue(
    dispatcher: Arc<Dispatcher>,
    capacity: usize,
) -> (WebhookSender, WebhookWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        WebhookSender { tx },
        WebhookWorker {
            dispatcher,
            rx,
            shutdown: Arc::new(Notify::new()),
        },
    )
}

/// Enqueues verified payloads.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    tx: mpsc::Sender<Value>,
}

impl WebhookSender {
    /// Enqueue a payload, waiting while the queue is full.
    ///
    /// Fails once the worker has shut down.
    pub async fn send(&self, payload: Value) -> Result<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| Error::Other("Webhook queue is closed".to_string()))
    }
}

/// Drains the queue into [`Dispatcher::dispatch_webhook`].
pub struct WebhookWorker {
    dispatcher: Arc<Dispatcher>,
    rx: mpsc::Receiver<Value>,
    shutdown: Arc<Notify>,
}

impl WebhookWorker {
    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Dispatch payloads until shutdown is signalled or every sender is
    /// dropped. Payloads queued before shutdown are dispatched first.
    pub async fn run(mut self) {
        info!("Webhook worker started");

        loop {
            tokio::select! {
                biased;

                payload = self.rx.recv() => match payload {
                    Some(payload) => self.dispatch(payload).await,
                    None => break,
                },

                _ = self.shutdown.notified() => {
                    info!("Webhook worker received shutdown signal");
                    self.rx.close();
                    while let Some(payload) = self.rx.recv().await {
                        self.dispatch(payload).await;
                    }
                    break;
                }
            }
        }

        info!("Webhook worker stopped");
    }

    async fn dispatch(&self, payload: Value) {
        let handled = self.dispatcher.dispatch_webhook(&payload).await;
        debug!(handled = handled, "Webhook payload processed");
    }
}
