// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack blocks.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::block::{Block, BlockContext, DEFAULT_OUTPUT, InputEvent};
use crate::error::{BlockError, Result};
use crate::inputs::{InputField, map_inputs};

const GET_STACK_QUERY: &str = r#"
query GetStack($id: ID!) {
  stack(id: $id) {
    id
    name
    description
    space
    repository
    repositoryURL
    branch
    projectRoot
    provider
    labels
    administrative
    autodeploy
    isDisabled
    state
    isDrifted
    lockedAt
    lockedBy
    lockNote
    trackedCommit {
      hash
      message
      authorName
      timestamp
      url
    }
    createdAt
  }
}
"#;

const LOCK_STACK_MUTATION: &str = r#"
mutation LockStack($id: ID!, $note: String) {
  stackLock(id: $id, note: $note) {
    id
    lockedAt
    lockNote
  }
}
"#;

const UNLOCK_STACK_MUTATION: &str = r#"
mutation UnlockStack($id: ID!) {
  stackUnlock(id: $id) {
    id
    lockedAt
  }
}
"#;

const GET_STACK_INPUTS: &[InputField] = &[InputField::required("stackId", "Stack ID", "id")];

const LOCK_STACK_INPUTS: &[InputField] = &[
    InputField::required("stackId", "Stack ID", "id"),
    InputField::optional("note", "Lock note", "note"),
];

const UNLOCK_STACK_INPUTS: &[InputField] = &[InputField::required("stackId", "Stack ID", "id")];

#[derive(Debug, Deserialize)]
struct GetStackData {
    stack: Option<StackDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackDetails {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    space: String,
    #[serde(default)]
    repository: Option<String>,
    #[serde(rename = "repositoryURL", default)]
    repository_url: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    project_root: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    administrative: bool,
    #[serde(default)]
    autodeploy: bool,
    #[serde(default)]
    is_disabled: bool,
    state: String,
    #[serde(default)]
    is_drifted: bool,
    #[serde(default)]
    locked_at: Option<i64>,
    #[serde(default)]
    locked_by: Option<String>,
    #[serde(default)]
    lock_note: Option<String>,
    #[serde(default)]
    tracked_commit: Option<Value>,
    #[serde(default)]
    created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockStackData {
    stack_lock: LockState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlockStackData {
    stack_unlock: LockState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockState {
    id: String,
    #[serde(default)]
    locked_at: Option<i64>,
    #[serde(default)]
    lock_note: Option<String>,
}

/// Fetches a stack's configuration and status.
pub struct GetStack;

#[async_trait]
impl Block for GetStack {
    fn block_type(&self) -> &'static str {
        "getStack"
    }

    fn name(&self) -> &'static str {
        "Get stack"
    }

    fn inputs(&self) -> &'static [InputField] {
        GET_STACK_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        let variables = map_inputs(GET_STACK_INPUTS, &event.inputs)?;
        let data: GetStackData = ctx.execute(GET_STACK_QUERY, variables).await?;
        let stack = data
            .stack
            .ok_or_else(|| BlockError::Validation("Stack not found".to_string()))?;

        ctx.emit(
            DEFAULT_OUTPUT,
            json!({
                "stackId": stack.id,
                "name": stack.name,
                "description": stack.description,
                "spaceId": stack.space,
                "repository": stack.repository,
                "repositoryUrl": stack.repository_url,
                "branch": stack.branch,
                "projectRoot": stack.project_root,
                "provider": stack.provider,
                "labels": stack.labels,
                "administrative": stack.administrative,
                "autodeploy": stack.autodeploy,
                "isDisabled": stack.is_disabled,
                "state": stack.state,
                "isDrifted": stack.is_drifted,
                "locked": stack.locked_at.is_some(),
                "lockedAt": stack.locked_at,
                "lockedBy": stack.locked_by,
                "lockNote": stack.lock_note,
                "trackedCommit": stack.tracked_commit,
                "createdAt": stack.created_at,
            }),
            Some(event.id.clone()),
        )
        .await?;
        Ok(())
    }
}

/// Locks a stack for exclusive use.
pub struct LockStack;

#[async_trait]
impl Block for LockStack {
    fn block_type(&self) -> &'static str {
        "lockStack"
    }

    fn name(&self) -> &'static str {
        "Lock stack"
    }

    fn inputs(&self) -> &'static [InputField] {
        LOCK_STACK_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        let variables = map_inputs(LOCK_STACK_INPUTS, &event.inputs)?;
        let data: LockStackData = ctx.execute(LOCK_STACK_MUTATION, variables).await?;
        let lock = data.stack_lock;

        ctx.emit(
            DEFAULT_OUTPUT,
            json!({
                "stackId": lock.id,
                "locked": lock.locked_at.is_some(),
                "lockNote": lock.lock_note,
            }),
            Some(event.id.clone()),
        )
        .await?;
        Ok(())
    }
}

/// Releases a stack lock.
pub struct UnlockStack;

#[async_trait]
impl Block for UnlockStack {
    fn block_type(&self) -> &'static str {
        "unlockStack"
    }

    fn name(&self) -> &'static str {
        "Unlock stack"
    }

    fn inputs(&self) -> &'static [InputField] {
        UNLOCK_STACK_INPUTS
    }

    async fn on_event(&self, ctx: &BlockContext, event: &InputEvent) -> Result<()> {
        let variables = map_inputs(UNLOCK_STACK_INPUTS, &event.inputs)?;
        let data: UnlockStackData = ctx.execute(UNLOCK_STACK_MUTATION, variables).await?;
        let lock = data.stack_unlock;

        ctx.emit(
            DEFAULT_OUTPUT,
            json!({
                "stackId": lock.id,
                "locked": lock.locked_at.is_some(),
            }),
            Some(event.id.clone()),
        )
        .await?;
        Ok(())
    }
}

inventory::submit! { &GetStack as &'static dyn Block }
inventory::submit! { &LockStack as &'static dyn Block }
inventory::submit! { &UnlockStack as &'static dyn Block }
