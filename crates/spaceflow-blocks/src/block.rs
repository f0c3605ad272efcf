// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Block trait, handler context and registry.
//!
//! Block types are registered using the `inventory` crate for automatic
//! discovery; the host looks them up by type id when instantiating the
//! blocks listed in its configuration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use spaceflow_client::{AppConfig, Credentials, SpaceliftClient};
use spaceflow_host::{EventId, EventSink, KvNamespace, OutgoingEvent};

use crate::error::{BlockError, Result};
use crate::inputs::InputField;

/// Output every action block emits its result on.
pub const DEFAULT_OUTPUT: &str = "default";

/// Everything a handler may touch.
///
/// Built by the host per invocation. `kv` is scoped to this block instance;
/// `app_kv` is shared by the whole installation.
#[derive(Clone)]
pub struct BlockContext {
    /// Block instance id.
    pub block_id: String,
    /// App installation configuration.
    pub app_config: AppConfig,
    /// Per-instance configuration.
    pub block_config: Value,
    /// App-scoped KV.
    pub app_kv: KvNamespace,
    /// Block-scoped KV.
    pub kv: KvNamespace,
    /// Event sink.
    pub events: Arc<dyn EventSink>,
    /// Spacelift client.
    pub client: SpaceliftClient,
}

impl BlockContext {
    /// Credentials from the app configuration.
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials::from_config(&self.app_config)?)
    }

    /// Execute a GraphQL document with the installation's credentials.
    pub async fn execute<T: DeserializeOwned>(&self, document: &str, variables: Value) -> Result<T> {
        let credentials = self.credentials()?;
        Ok(self.client.execute(&credentials, document, variables).await?)
    }

    /// Emit `payload` on `output_key`, caused by `parent`.
    pub async fn emit(
        &self,
        output_key: &str,
        payload: Value,
        parent: Option<EventId>,
    ) -> Result<EventId> {
        let event = OutgoingEvent::new(output_key, payload).with_parent(parent);
        Ok(self.events.emit(&self.block_id, event).await?)
    }
}

/// An event arriving on a block's input.
#[derive(Debug, Clone)]
pub struct InputEvent {
    /// Id of the triggering event.
    pub id: EventId,
    /// Input values keyed by input key.
    pub inputs: Value,
}

/// A block type.
///
/// Every handler runs to completion before the host delivers the next
/// message to the same block instance.
#[async_trait]
pub trait Block: Send + Sync {
    /// Stable type id, e.g. `triggerRun`.
    fn block_type(&self) -> &'static str;

    /// Display name.
    fn name(&self) -> &'static str;

    /// Declared inputs.
    fn inputs(&self) -> &'static [InputField] {
        &[]
    }

    /// Whether verified webhook payloads are dispatched to this block.
    fn accepts_webhooks(&self) -> bool {
        false
    }

    /// Handle an event on the block's input.
    async fn on_event(&self, _ctx: &BlockContext, _event: &InputEvent) -> Result<()> {
        Err(BlockError::Validation(format!(
            "Block type '{}' has no input",
            self.block_type()
        )))
    }

    /// Handle a webhook payload forwarded by the host.
    async fn on_internal_message(&self, _ctx: &BlockContext, _payload: &Value) -> Result<()> {
        Ok(())
    }

    /// Handle the hourly schedule tick.
    async fn on_schedule(&self, _ctx: &BlockContext, _now: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

inventory::collect!(&'static dyn Block);

/// Look up a registered block type.
pub fn find_block(block_type: &str) -> Result<&'static dyn Block> {
    inventory::iter::<&'static dyn Block>
        .into_iter()
        .find(|b| b.block_type() == block_type)
        .copied()
        .ok_or_else(|| BlockError::UnknownBlockType(block_type.to_string()))
}

/// Type ids of every registered block, sorted.
pub fn block_types() -> Vec<&'static str> {
    let mut ids: Vec<_> = inventory::iter::<&'static dyn Block>
        .into_iter()
        .map(|b| b.block_type())
        .collect();
    ids.sort_unstable();
    ids
}
