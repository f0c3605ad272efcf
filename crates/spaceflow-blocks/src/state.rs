// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run states and the state-change notification payload.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumString, VariantNames};

use crate::error::{BlockError, Result};

/// Spacelift run state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Queued,
    Canceled,
    Initializing,
    Planning,
    Failed,
    Finished,
    Unconfirmed,
    Discarded,
    Confirmed,
    Applying,
    Performing,
    Stopped,
    Destroying,
    Preparing,
    PreparingApply,
    Skipped,
    ReplanRequested,
    Ready,
    PreparingReplan,
    PendingReview,
}

/// Run reference in a notification. Fields beyond `id` and `type` are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRef {
    /// Run id.
    pub id: String,
    /// Run type, e.g. `TRACKED` or `TASK`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub run_type: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stack reference in a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRef {
    /// Stack id.
    pub id: String,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A run state-change notification as delivered by the Spacelift webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStateChange {
    /// The run (or task) that changed state.
    pub run: RunRef,
    /// Owning stack.
    #[serde(default)]
    pub stack: Option<StackRef>,
    /// New state as reported. Unknown states are kept as strings.
    pub state: String,
    /// Monotonic state counter.
    #[serde(default)]
    pub state_version: Option<Value>,
    /// Account details.
    #[serde(default)]
    pub account: Option<Value>,
    /// Optional note attached to the transition.
    #[serde(default)]
    pub note: Option<String>,
}

impl RunStateChange {
    /// Parse a webhook payload.
    ///
    /// Returns `Ok(None)` for payloads that do not describe a run, which are
    /// not addressed to run or task blocks.
    pub fn from_payload(payload: &Value) -> Result<Option<Self>> {
        match payload.get("run") {
            None | Some(Value::Null) => Ok(None),
            Some(_) => serde_json::from_value(payload.clone())
                .map(Some)
                .map_err(|e| BlockError::Payload(format!("Invalid run state change: {}", e))),
        }
    }

    /// Parsed state, if it is one of the known states.
    pub fn known_state(&self) -> Option<RunState> {
        RunState::from_str(&self.state).ok()
    }

    /// Body of the `stateChanged` and `completed` events.
    pub fn event_payload(&self) -> Value {
        json!({
            "run": self.run,
            "stack": self.stack,
            "state": self.state,
            "stateVersion": self.state_version,
            "account": self.account,
        })
    }
}
