// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery of inputs, webhooks and schedule ticks to block instances.
//!
//! Every instance owns an async mutex, so one instance runs one handler at a
//! time while different instances proceed concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use spaceflow_blocks::{Block, BlockContext, InputEvent, find_block};
use spaceflow_client::{AppConfig, SpaceliftClient};
use spaceflow_host::{EventId, EventSink, KvNamespace, KvStore};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::BlockSpec;
use crate::error::{Error, Result};

/// A configured block instance.
pub struct BlockInstance {
    id: String,
    block: &'static dyn Block,
    config: Value,
    lock: Mutex<()>,
}

impl BlockInstance {
    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registered block type.
    pub fn block_type(&self) -> &'static str {
        self.block.block_type()
    }
}

/// Routes work to the hosted block instances.
pub struct Dispatcher {
    instances: BTreeMap<String, Arc<BlockInstance>>,
    app_config: AppConfig,
    store: Arc<dyn KvStore>,
    events: Arc<dyn EventSink>,
    client: SpaceliftClient,
}

impl Dispatcher {
    /// Instantiate the blocks in `specs`.
    ///
    /// Fails on an unknown block type.
    pub fn new(
        app_config: AppConfig,
        store: Arc<dyn KvStore>,
        events: Arc<dyn EventSink>,
        client: SpaceliftClient,
        specs: &[BlockSpec],
    ) -> Result<Self> {
        let mut instances = BTreeMap::new();
        for spec in specs {
            let block = find_block(&spec.block_type)?;
            instances.insert(
                spec.id.clone(),
                Arc::new(BlockInstance {
                    id: spec.id.clone(),
                    block,
                    config: spec.config.clone(),
                    lock: Mutex::new(()),
                }),
            );
        }

        info!(
            block_count = instances.len(),
            "Block instances loaded"
        );

        Ok(Self {
            instances,
            app_config,
            store,
            events,
            client,
        })
    }

    /// App-scoped KV namespace.
    pub fn app_kv(&self) -> KvNamespace {
        KvNamespace::app(self.store.clone())
    }

    /// Look up an instance.
    pub fn instance(&self, block_id: &str) -> Option<&Arc<BlockInstance>> {
        self.instances.get(block_id)
    }

    /// Ids of instances receiving verified webhook payloads.
    pub fn webhook_targets(&self) -> Vec<&str> {
        self.instances
            .values()
            .filter(|i| i.block.accepts_webhooks())
            .map(|i| i.id.as_str())
            .collect()
    }

    fn context(&self, instance: &BlockInstance) -> BlockContext {
        BlockContext {
            block_id: instance.id.clone(),
            app_config: self.app_config.clone(),
            block_config: instance.config.clone(),
            app_kv: self.app_kv(),
            kv: KvNamespace::block(self.store.clone(), &instance.id),
            events: self.events.clone(),
            client: self.client.clone(),
        }
    }

    /// Deliver an input event to `block_id` and wait for the handler.
    ///
    /// Returns the id assigned to the input event.
    pub async fn invoke(&self, block_id: &str, inputs: Value) -> Result<EventId> {
        let instance = self
            .instance(block_id)
            .ok_or_else(|| Error::BlockNotFound(block_id.to_string()))?;

        let event = InputEvent {
            id: EventId::generate(),
            inputs,
        };
        let ctx = self.context(instance);

        let _guard = instance.lock.lock().await;
        instance.block.on_event(&ctx, &event).await?;

        debug!(
            block_id = %block_id,
            block_type = instance.block_type(),
            event_id = %event.id,
            "Input event handled"
        );

        Ok(event.id)
    }

    /// Forward a verified webhook payload to every webhook target.
    ///
    /// Handler failures are logged and do not stop delivery to the remaining
    /// instances. Returns the number of instances that handled the payload.
    pub async fn dispatch_webhook(&self, payload: &Value) -> usize {
        let mut handled = 0;

        for instance in self.instances.values() {
            if !instance.block.accepts_webhooks() {
                continue;
            }

            let ctx = self.context(instance);
            let _guard = instance.lock.lock().await;
            match instance.block.on_internal_message(&ctx, payload).await {
                Ok(()) => handled += 1,
                Err(e) => {
                    error!(
                        block_id = %instance.id,
                        block_type = instance.block_type(),
                        error = %e,
                        "Failed to handle webhook payload"
                    );
                }
            }
        }

        debug!(handled = handled, "Webhook payload dispatched");
        handled
    }

    /// Run the schedule handler of every instance.
    ///
    /// Returns the number of handlers that failed.
    pub async fn run_schedules(&self, now: DateTime<Utc>) -> usize {
        let mut failed = 0;

        for instance in self.instances.values() {
            let ctx = self.context(instance);
            let _guard = instance.lock.lock().await;
            if let Err(e) = instance.block.on_schedule(&ctx, now).await {
                failed += 1;
                warn!(
                    block_id = %instance.id,
                    block_type = instance.block_type(),
                    error = %e,
                    "Schedule handler failed"
                );
            }
        }

        failed
    }

    /// Delete resolved pending events and emitted events recorded before
    /// `before`.
    pub async fn prune_events(&self, before: DateTime<Utc>) -> Result<u64> {
        Ok(self.events.prune(before).await?)
    }
}
