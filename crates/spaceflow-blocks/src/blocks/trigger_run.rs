// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger a run and follow it to completion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::block::{Block, BlockContext, InputEvent};
use crate::correlator::{Correlator, OperationKind};
use crate::error::{BlockError, Result};
use crate::inputs::{InputField, map_inputs, variable_str};

pub(crate) const RUN_TRIGGER_MUTATION: &str = r#"
mutation StartRun($stack: ID!, $runType: RunType, $commitSha: String) {
  runTrigger(stack: $stack, runType: $runType, commitSha: $commitSha) {
    id
    createdAt
    updatedAt
    state
    type
    commit {
      hash
    }
  }
}
"#;

const INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "stack"),
    InputField::optional("commitSha", "Commit SHA", "commitSha"),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunTriggerData {
    pub run_trigger: TriggeredRun,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TriggeredRun {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    pub state: String,
    #[serde(rename = "type")]
    pub run_type: String,
    #[serde(default)]
    pub commit: Option<Commit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Commit {
    pub hash: String,
}

/// Starts a run and emits `stateChanged` for every transition, then
/// `completed` once the run reaches a terminal state.
pub struct TriggerRun;

#[async_trait]
impl Block for TriggerRun {
    fn block_type(&self) -> &'static str {
        "triggerRun"
    }

    fn name(&self) -> &'static str {
        "Trigger run"
    }

    fn inputs(&self) -> &'static [InputField] {
        INPUTS
    }

    fn accepts_webhooks(&self) -> bool {
        true
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        let variables = map_inputs(INPUTS, &event.inputs)?;
        let stack_id = variable_str(&variables, "stack")
            .ok_or_else(|| BlockError::Validation("Stack ID must be a string".to_string()))?
            .to_string();

        let data: RunTriggerData = ctx.execute(RUN_TRIGGER_MUTATION, variables).await?;
        let run_id = data.run_trigger.id;

        info!(block_id = %ctx.block_id, run_id = %run_id, stack_id = %stack_id, "Run triggered");

        Correlator::for_block(OperationKind::Run, ctx)
            .register(
                &run_id,
                &stack_id,
                json!({ "runId": run_id, "stackId": stack_id }),
                Some(event.id.clone()),
                Utc::now(),
            )
            .await?;

        Ok(())
    }

    async fn on_internal_message(&self, ctx: &BlockContext, payload: &Value) -> Result<()> {
        Correlator::for_block(OperationKind::Run, ctx)
            .notify(payload)
            .await?;
        Ok(())
    }

    async fn on_schedule(&self, ctx: &BlockContext, now: DateTime<Utc>) -> Result<()> {
        Correlator::for_block(OperationKind::Run, ctx)
            .reap(now)
            .await?;
        Ok(())
    }
}

inventory::submit! {
    &TriggerRun as &'static dyn Block
}
