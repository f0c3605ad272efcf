// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Correlation of asynchronous run/task completion.
//!
//! Triggering a run (or task) announces a pending `completed` event and
//! stores a correlation record under `run:<id>` (or `task:<id>`) in the
//! block's KV namespace. Webhook notifications look the record up by remote
//! id:
//!
//! ```text
//! register ──► record + pending event
//!                  │
//! notify(state) ───┼─► update status, emit stateChanged
//!                  │
//! notify(terminal) ┴─► update status, emit completed (resolves pending),
//!                      delete record
//! reap(now)  ──────► cancel pending older than 24h, delete record
//! ```
//!
//! A notification for a run without a record is dropped silently: the
//! platform delivers at least once and the run may already be complete or
//! belong to another block instance.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use spaceflow_host::{
    EventId, EventSink, HostError, KvNamespace, NewPendingEvent, OutgoingEvent, PendingEventId,
};
use tracing::{debug, info, warn};

use crate::block::BlockContext;
use crate::error::Result;
use crate::state::{RunState, RunStateChange};

/// Output the pending event resolves on.
pub const COMPLETED_OUTPUT: &str = "completed";

/// Output non-terminal transitions are emitted on.
pub const STATE_CHANGED_OUTPUT: &str = "stateChanged";

/// Age after which an unresolved record is reaped.
pub fn stale_after() -> Duration {
    Duration::hours(24)
}

/// Kind of remote operation being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A stack run.
    Run,
    /// A one-off task.
    Task,
}

impl OperationKind {
    /// Record key prefix.
    pub fn key_prefix(self) -> &'static str {
        match self {
            OperationKind::Run => "run:",
            OperationKind::Task => "task:",
        }
    }

    /// Label used in status descriptions.
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Run => "Run",
            OperationKind::Task => "Task",
        }
    }

    /// Record key for `remote_id`.
    pub fn record_key(self, remote_id: &str) -> String {
        format!("{}{}", self.key_prefix(), remote_id)
    }

    /// States after which no further transitions occur.
    pub fn terminal_states(self) -> &'static [RunState] {
        match self {
            OperationKind::Run => &[
                RunState::Canceled,
                RunState::Failed,
                RunState::Finished,
                RunState::Discarded,
                RunState::Stopped,
                RunState::Skipped,
            ],
            OperationKind::Task => &[
                RunState::Canceled,
                RunState::Failed,
                RunState::Finished,
                RunState::Stopped,
                RunState::Skipped,
            ],
        }
    }

    /// Whether `state` ends an operation of this kind.
    pub fn is_terminal(self, state: Option<RunState>) -> bool {
        state.is_some_and(|s| self.terminal_states().contains(&s))
    }
}

/// Local state linking a remote operation to its pending event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationRecord {
    /// Remote run or task id.
    pub remote_id: String,
    /// Stack the operation runs on.
    pub stack_id: String,
    /// Pending `completed` event.
    pub pending_event_id: PendingEventId,
    /// Event that triggered the operation.
    pub parent_event_id: Option<EventId>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

/// Result of handling one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The payload does not describe a run.
    Ignored,
    /// No record for this id in this block instance.
    Untracked,
    /// A non-terminal transition was emitted on `stateChanged`.
    Progressed,
    /// The terminal transition was emitted on `completed` and the record
    /// deleted.
    Completed,
    /// The pending event had already been resolved; the record was deleted.
    Stale,
}

/// Tracks operations of one kind for one block instance.
pub struct Correlator {
    kind: OperationKind,
    block_id: String,
    kv: KvNamespace,
    events: Arc<dyn EventSink>,
}

impl Correlator {
    /// Create a correlator over explicit storage.
    pub fn new(
        kind: OperationKind,
        block_id: impl Into<String>,
        kv: KvNamespace,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            kind,
            block_id: block_id.into(),
            kv,
            events,
        }
    }

    /// Create a correlator over a block instance's storage.
    pub fn for_block(kind: OperationKind, ctx: &BlockContext) -> Self {
        Self::new(kind, ctx.block_id.clone(), ctx.kv.clone(), ctx.events.clone())
    }

    /// Announce the pending outcome of a just-triggered operation and persist
    /// its record. Both writes complete before this returns.
    pub async fn register(
        &self,
        remote_id: &str,
        stack_id: &str,
        preview: Value,
        parent_event_id: Option<EventId>,
        now: DateTime<Utc>,
    ) -> Result<CorrelationRecord> {
        let pending_event_id = self
            .events
            .create_pending(
                &self.block_id,
                NewPendingEvent {
                    output_key: COMPLETED_OUTPUT.to_string(),
                    payload: preview,
                    status_description: format!("{} {} started", self.kind.label(), remote_id),
                },
            )
            .await?;

        let record = CorrelationRecord {
            remote_id: remote_id.to_string(),
            stack_id: stack_id.to_string(),
            pending_event_id,
            parent_event_id,
            created_at: now.timestamp_millis(),
        };

        self.kv
            .set(&self.kind.record_key(remote_id), &record, None)
            .await?;

        info!(
            block_id = %self.block_id,
            remote_id = %remote_id,
            stack_id = %stack_id,
            pending_event_id = %record.pending_event_id,
            "{} registered for completion tracking",
            self.kind.label()
        );

        Ok(record)
    }

    /// Look up the record for `remote_id`.
    pub async fn record(&self, remote_id: &str) -> Result<Option<CorrelationRecord>> {
        Ok(self.kv.get(&self.kind.record_key(remote_id)).await?)
    }

    /// Apply one webhook notification.
    pub async fn notify(&self, payload: &Value) -> Result<NotifyOutcome> {
        let Some(change) = RunStateChange::from_payload(payload)? else {
            return Ok(NotifyOutcome::Ignored);
        };

        let remote_id = change.run.id.as_str();
        let Some(record) = self.record(remote_id).await? else {
            debug!(block_id = %self.block_id, remote_id = %remote_id, "Notification for untracked operation");
            return Ok(NotifyOutcome::Untracked);
        };

        let status = format!(
            "{} {} is {}",
            self.kind.label(),
            remote_id,
            change.state.to_lowercase()
        );

        match self
            .events
            .update_pending(&record.pending_event_id, &status)
            .await
        {
            Ok(()) => {}
            Err(HostError::PendingAlreadyResolved(_)) | Err(HostError::PendingNotFound(_)) => {
                // Completion was emitted before a crash prevented the delete.
                warn!(
                    block_id = %self.block_id,
                    remote_id = %remote_id,
                    "Pending event already resolved, removing leftover record"
                );
                self.delete_record(remote_id).await?;
                return Ok(NotifyOutcome::Stale);
            }
            Err(e) => return Err(e.into()),
        }

        let body = change.event_payload();
        let parent = record.parent_event_id.clone();

        if !self.kind.is_terminal(change.known_state()) {
            self.events
                .emit(
                    &self.block_id,
                    OutgoingEvent::new(STATE_CHANGED_OUTPUT, body).with_parent(parent),
                )
                .await?;

            debug!(
                block_id = %self.block_id,
                remote_id = %remote_id,
                state = %change.state,
                "{} state changed",
                self.kind.label()
            );
            return Ok(NotifyOutcome::Progressed);
        }

        let completed = OutgoingEvent::new(COMPLETED_OUTPUT, body)
            .with_parent(parent)
            .completing(record.pending_event_id.clone());

        match self.events.emit(&self.block_id, completed).await {
            Ok(_) => {}
            Err(HostError::PendingAlreadyResolved(_)) => {
                warn!(
                    block_id = %self.block_id,
                    remote_id = %remote_id,
                    "Pending event resolved concurrently"
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.delete_record(remote_id).await?;

        info!(
            block_id = %self.block_id,
            remote_id = %remote_id,
            state = %change.state,
            "{} completed",
            self.kind.label()
        );

        Ok(NotifyOutcome::Completed)
    }

    /// Cancel and delete every record created before `now - 24h`.
    ///
    /// Entries that do not parse as a record are logged and left in place.
    /// Returns the number of records removed.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<usize> {
        let threshold = (now - stale_after()).timestamp_millis();
        let entries: Vec<(String, Value)> = self.kv.list(self.kind.key_prefix()).await?;

        let mut reaped = 0;
        for (key, value) in entries {
            let record: CorrelationRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        block_id = %self.block_id,
                        key = %key,
                        error = %e,
                        "Skipping unreadable correlation record"
                    );
                    continue;
                }
            };

            if record.created_at >= threshold {
                continue;
            }

            let reason = format!(
                "{} {} did not complete within 24 hours - cleaning up stale pending event",
                self.kind.label(),
                record.remote_id
            );

            match self
                .events
                .cancel_pending(&record.pending_event_id, &reason)
                .await
            {
                Ok(()) => {}
                Err(HostError::PendingAlreadyResolved(_)) | Err(HostError::PendingNotFound(_)) => {
                    debug!(
                        block_id = %self.block_id,
                        remote_id = %record.remote_id,
                        "Stale record's pending event already resolved"
                    );
                }
                Err(e) => return Err(e.into()),
            }

            self.delete_record(&record.remote_id).await?;
            reaped += 1;

            info!(
                block_id = %self.block_id,
                remote_id = %record.remote_id,
                "Reaped stale {} record",
                self.kind.key_prefix().trim_end_matches(':')
            );
        }

        Ok(reaped)
    }

    async fn delete_record(&self, remote_id: &str) -> Result<()> {
        let key = self.kind.record_key(remote_id);
        self.kv.delete(&[key.as_str()]).await?;
        Ok(())
    }
}
