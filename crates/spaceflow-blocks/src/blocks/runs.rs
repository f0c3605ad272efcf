// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle blocks.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::trigger_run::{RUN_TRIGGER_MUTATION, RunTriggerData};
use crate::block::{Block, BlockContext, DEFAULT_OUTPUT, InputEvent};
use crate::error::{BlockError, Result};
use crate::inputs::{InputField, map_inputs};

// ============================================================================
// startRun
// ============================================================================

const START_RUN_INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "stack"),
    InputField::optional("runType", "Run type", "runType"),
    InputField::optional("commitSha", "Commit SHA", "commitSha"),
];

/// Starts a run without tracking it.
pub struct StartRun;

#[async_trait]
impl Block for StartRun {
    fn block_type(&self) -> &'static str {
        "startRun"
    }

    fn name(&self) -> &'static str {
        "Start run"
    }

    fn inputs(&self) -> &'static [InputField] {
        START_RUN_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        let variables = map_inputs(START_RUN_INPUTS, &event.inputs)?;
        let data: RunTriggerData = ctx.execute(RUN_TRIGGER_MUTATION, variables).await?;
        let run = data.run_trigger;

        ctx.emit(
            DEFAULT_OUTPUT,
            json!({
                "runId": run.id,
                "state": run.state,
                "type": run.run_type,
                "commitSha": run.commit.map(|c| c.hash),
                "createdAt": run.created_at,
                "updatedAt": run.updated_at,
            }),
            Some(event.id.clone()),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// getRun
// ============================================================================

const GET_RUN_QUERY: &str = r#"
query GetRun($stackId: ID!, $runId: ID!) {
  stack(id: $stackId) {
    id
    name
    run(id: $runId) {
      id
      createdAt
      updatedAt
      state
      type
      commit {
        hash
      }
      triggeredBy
      delta {
        addCount
        deleteCount
        changeCount
      }
    }
  }
}
"#;

const GET_RUN_INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "stackId"),
    InputField::required("runId", "Run ID", "runId"),
];

#[derive(Debug, Deserialize)]
struct GetRunData {
    stack: Option<StackWithRun>,
}

#[derive(Debug, Deserialize)]
struct StackWithRun {
    id: String,
    name: String,
    run: Option<RunDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunDetails {
    id: String,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
    state: String,
    #[serde(rename = "type")]
    run_type: String,
    #[serde(default)]
    commit: Option<CommitRef>,
    #[serde(default)]
    triggered_by: Option<String>,
    #[serde(default)]
    delta: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    hash: String,
}

/// Fetches one run of a stack.
pub struct GetRun;

#[async_trait]
impl Block for GetRun {
    fn block_type(&self) -> &'static str {
        "getRun"
    }

    fn name(&self) -> &'static str {
        "Get run"
    }

    fn inputs(&self) -> &'static [InputField] {
        GET_RUN_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        let variables = map_inputs(GET_RUN_INPUTS, &event.inputs)?;
        let data: GetRunData = ctx.execute(GET_RUN_QUERY, variables).await?;

        let stack = data
            .stack
            .ok_or_else(|| BlockError::Validation("Stack not found".to_string()))?;
        let run = stack
            .run
            .ok_or_else(|| BlockError::Validation("Run not found".to_string()))?;

        ctx.emit(
            DEFAULT_OUTPUT,
            json!({
                "runId": run.id,
                "stackId": stack.id,
                "stackName": stack.name,
                "state": run.state,
                "type": run.run_type,
                "commitSha": run.commit.map(|c| c.hash),
                "triggeredBy": run.triggered_by,
                "createdAt": run.created_at,
                "updatedAt": run.updated_at,
                "delta": run.delta,
            }),
            Some(event.id.clone()),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// Run state transitions (confirm, discard, stop, retry)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTransition {
    id: String,
    state: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "type", default)]
    run_type: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
}

/// Execute a run mutation whose result is a single run under `field` and
/// emit the run summary.
async fn transition_run(
    ctx: &BlockContext,
    event: &InputEvent,
    inputs: &[InputField],
    document: &str,
    field: &str,
) -> Result<()> {
    let variables = map_inputs(inputs, &event.inputs)?;
    let mut data: Map<String, Value> = ctx.execute(document, variables).await?;

    let run: RunTransition = data
        .remove(field)
        .filter(|v| !v.is_null())
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| BlockError::Payload(format!("Unexpected {} response: {}", field, e)))?
        .ok_or_else(|| BlockError::Payload(format!("Missing {} in response", field)))?;

    let mut payload = json!({
        "runId": run.id,
        "state": run.state,
        "title": run.title,
        "createdAt": run.created_at,
        "updatedAt": run.updated_at,
    });
    if let Some(run_type) = run.run_type {
        payload["type"] = Value::String(run_type);
    }

    ctx.emit(DEFAULT_OUTPUT, payload, Some(event.id.clone()))
        .await?;
    Ok(())
}

const CONFIRM_RUN_MUTATION: &str = r#"
mutation ConfirmRun($stack: ID!, $run: ID, $note: String) {
  runConfirm(stack: $stack, run: $run, note: $note) {
    id
    state
    title
    createdAt
    updatedAt
  }
}
"#;

const DISCARD_RUN_MUTATION: &str = r#"
mutation DiscardRun($stack: ID!, $run: ID, $note: String) {
  runDiscard(stack: $stack, run: $run, note: $note) {
    id
    state
    title
    createdAt
    updatedAt
  }
}
"#;

const STOP_RUN_MUTATION: &str = r#"
mutation StopRun($stack: ID!, $run: ID!, $note: String) {
  runStop(stack: $stack, run: $run, note: $note) {
    id
    state
    title
    createdAt
    updatedAt
  }
}
"#;

const RETRY_RUN_MUTATION: &str = r#"
mutation RetryRun($stack: ID!, $run: ID!) {
  runRetry(stack: $stack, run: $run) {
    id
    state
    title
    type
    createdAt
    updatedAt
  }
}
"#;

const BLOCKING_RUN_INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "stack"),
    InputField::optional("runId", "Run ID", "run"),
    InputField::optional("note", "Note", "note"),
];

const STOP_RUN_INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "stack"),
    InputField::required("runId", "Run ID", "run"),
    InputField::optional("note", "Note", "note"),
];

const RETRY_RUN_INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "stack"),
    InputField::required("runId", "Run ID", "run"),
];

/// Confirms a run awaiting confirmation (the stack's blocking run if no id
/// is given).
pub struct ConfirmRun;

#[async_trait]
impl Block for ConfirmRun {
    fn block_type(&self) -> &'static str {
        "confirmRun"
    }

    fn name(&self) -> &'static str {
        "Confirm run"
    }

    fn inputs(&self) -> &'static [InputField] {
        BLOCKING_RUN_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        transition_run(ctx, event, BLOCKING_RUN_INPUTS, CONFIRM_RUN_MUTATION, "runConfirm").await
    }
}

/// Discards a run awaiting confirmation.
pub struct DiscardRun;

#[async_trait]
impl Block for DiscardRun {
    fn block_type(&self) -> &'static str {
        "discardRun"
    }

    fn name(&self) -> &'static str {
        "Discard run"
    }

    fn inputs(&self) -> &'static [InputField] {
        BLOCKING_RUN_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        transition_run(ctx, event, BLOCKING_RUN_INPUTS, DISCARD_RUN_MUTATION, "runDiscard").await
    }
}

/// Stops a running run.
pub struct StopRun;

#[async_trait]
impl Block for StopRun {
    fn block_type(&self) -> &'static str {
        "stopRun"
    }

    fn name(&self) -> &'static str {
        "Stop run"
    }

    fn inputs(&self) -> &'static [InputField] {
        STOP_RUN_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        transition_run(ctx, event, STOP_RUN_INPUTS, STOP_RUN_MUTATION, "runStop").await
    }
}

/// Retries a run.
pub struct RetryRun;

#[async_trait]
impl Block for RetryRun {
    fn block_type(&self) -> &'static str {
        "retryRun"
    }

    fn name(&self) -> &'static str {
        "Retry run"
    }

    fn inputs(&self) -> &'static [InputField] {
        RETRY_RUN_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        transition_run(ctx, event, RETRY_RUN_INPUTS, RETRY_RUN_MUTATION, "runRetry").await
    }
}

inventory::submit! { &StartRun as &'static dyn Block }
inventory::submit! { &GetRun as &'static dyn Block }
inventory::submit! { &ConfirmRun as &'static dyn Block }
inventory::submit! { &DiscardRun as &'static dyn Block }
inventory::submit! { &StopRun as &'static dyn Block }
inventory::submit! { &RetryRun as &'static dyn Block }
