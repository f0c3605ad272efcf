// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run a one-off task on a stack and follow it to completion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::block::{Block, BlockContext, InputEvent};
use crate::correlator::{Correlator, OperationKind};
use crate::error::{BlockError, Result};
use crate::inputs::{InputField, map_inputs, variable_str};

const TASK_CREATE_MUTATION: &str = r#"
mutation CreateTask($stack: ID!, $command: String!, $skipInitialization: Boolean) {
  taskCreate(stack: $stack, command: $command, skipInitialization: $skipInitialization) {
    id
    createdAt
    state
    command
  }
}
"#;

const INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "stack"),
    InputField::required("command", "Command", "command"),
    InputField::optional("skipInitialization", "Skip initialization", "skipInitialization"),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskCreateData {
    task_create: CreatedTask,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    id: String,
    command: String,
}

/// Runs a task and emits `stateChanged` for every transition, then
/// `completed` once the task reaches a terminal state.
pub struct PerformTask;

#[async_trait]
impl Block for PerformTask {
    fn block_type(&self) -> &'static str {
        "performTask"
    }

    fn name(&self) -> &'static str {
        "Perform task"
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

        let data: TaskCreateData = ctx.execute(TASK_CREATE_MUTATION, variables).await?;
        let task = data.task_create;

        info!(block_id = %ctx.block_id, task_id = %task.id, stack_id = %stack_id, "Task created");

        Correlator::for_block(OperationKind::Task, ctx)
            .register(
                &task.id,
                &stack_id,
                json!({ "taskId": task.id, "stackId": stack_id, "command": task.command }),
                Some(event.id.clone()),
                Utc::now(),
            )
            .await?;

        Ok(())
    }

    async fn on_internal_message(&self, ctx: &BlockContext, payload: &Value) -> Result<()> {
        Correlator::for_block(OperationKind::Task, ctx)
            .notify(payload)
            .await?;
        Ok(())
    }

    async fn on_schedule(&self, ctx: &BlockContext, now: DateTime<Utc>) -> Result<()> {
        Correlator::for_block(OperationKind::Task, ctx)
            .reap(now)
            .await?;
        Ok(())
    }
}

inventory::submit! {
    &PerformTask as &'static dyn Block
}
