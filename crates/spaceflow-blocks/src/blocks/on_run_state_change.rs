// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscription to run state changes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::block::{Block, BlockContext};
use crate::error::{BlockError, Result};
use crate::state::RunStateChange;

/// Output filtered notifications are emitted on.
pub const RUN_STATE_CHANGES_OUTPUT: &str = "runStateChanges";

/// Block configuration. Empty lists match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFilter {
    /// Stacks to follow.
    #[serde(default)]
    pub stack_ids: Vec<String>,
    /// States to emit.
    #[serde(default)]
    pub run_states: Vec<String>,
    /// Run types to emit.
    #[serde(default)]
    pub run_types: Vec<String>,
}

impl RunFilter {
    /// Parse block configuration; `null` means no filtering.
    pub fn from_config(config: &Value) -> Result<Self> {
        if config.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(config.clone())
            .map_err(|e| BlockError::Validation(format!("Invalid run filter configuration: {}", e)))
    }

    /// Whether `change` passes every non-empty filter.
    pub fn matches(&self, stack_id: &str, change: &RunStateChange) -> bool {
        fn allows(list: &[String], value: Option<&str>) -> bool {
            list.is_empty() || value.is_some_and(|v| list.iter().any(|item| item == v))
        }

        allows(&self.stack_ids, Some(stack_id))
            && allows(&self.run_states, Some(change.state.as_str()))
            && allows(&self.run_types, change.run.run_type.as_deref())
    }
}

/// Re-emits every run notification that passes the configured filter.
pub struct OnRunStateChange;

#[async_trait]
impl Block for OnRunStateChange {
    fn block_type(&self) -> &'static str {
        "onRunStateChange"
    }

    fn name(&self) -> &'static str {
        "On run state change"
    }

    fn accepts_webhooks(&self) -> bool {
        true
    }

    async fn on_internal_message(&self, ctx: &BlockContext, payload: &Value) -> Result<()> {
        let Some(change) = RunStateChange::from_payload(payload)? else {
            return Ok(());
        };
        let Some(stack) = change.stack.as_ref() else {
            return Ok(());
        };

        let filter = RunFilter::from_config(&ctx.block_config)?;
        if !filter.matches(&stack.id, &change) {
            debug!(block_id = %ctx.block_id, run_id = %change.run.id, "Run notification filtered out");
            return Ok(());
        }

        ctx.emit(RUN_STATE_CHANGES_OUTPUT, payload.clone(), None)
            .await?;
        Ok(())
    }
}

inventory::submit! {
    &OnRunStateChange as &'static dyn Block
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(state: &str, run_type: &str) -> RunStateChange {
        RunStateChange::from_payload(&json!({
            "run": { "id": "r-1", "type": run_type },
            "stack": { "id": "st-1" },
            "state": state
        }))
        .unwrap()
        .unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = RunFilter::from_config(&Value::Null).unwrap();
        assert!(filter.matches("st-1", &change("QUEUED", "TRACKED")));
    }

    #[test]
    fn test_each_list_restricts() {
        let filter = RunFilter::from_config(&json!({
            "stackIds": ["st-1"],
            "runStates": ["FINISHED", "FAILED"],
            "runTypes": ["TRACKED"]
        }))
        .unwrap();

        assert!(filter.matches("st-1", &change("FINISHED", "TRACKED")));
        assert!(!filter.matches("st-2", &change("FINISHED", "TRACKED")));
        assert!(!filter.matches("st-1", &change("PLANNING", "TRACKED")));
        assert!(!filter.matches("st-1", &change("FINISHED", "PROPOSED")));
    }

    #[test]
    fn test_invalid_config_is_validation_error() {
        let err = RunFilter::from_config(&json!({ "stackIds": "st-1" })).unwrap_err();
        assert!(err.is_validation());
    }
}
