// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Events and pending events.
//!
//! A block publishes results by emitting events on one of its outputs. A
//! long-running operation announces its eventual result up front as a
//! *pending event*, which is later resolved exactly once: either by an
//! emission that names it in [`OutgoingEvent::complete`], or by
//! [`EventSink::cancel_pending`].
//!
//! ```text
//!   create_pending ──► PENDING ──emit(complete)──► COMPLETED
//!                         │
//!                         └──cancel_pending──────► CANCELLED
//! ```
//!
//! Resolving a pending event twice fails with
//! [`HostError::PendingAlreadyResolved`](crate::HostError::PendingAlreadyResolved)
//! and leaves no trace of the second attempt.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Identifier of an emitted (or incoming) event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to a pending event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingEventId(pub String);

impl PendingEventId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PendingEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a pending event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingState {
    /// Announced, not yet resolved.
    Pending,
    /// Resolved by an emission.
    Completed,
    /// Resolved by cancellation.
    Cancelled,
}

impl PendingState {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation. Unknown values read as `Pending`.
    pub fn parse(value: &str) -> Self {
        match value {
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// Request to announce a pending event.
#[derive(Debug, Clone)]
pub struct NewPendingEvent {
    /// Output the eventual event will be emitted on.
    pub output_key: String,
    /// Preview payload describing the outcome being awaited.
    pub payload: Value,
    /// Human-readable progress text.
    pub status_description: String,
}

/// An event to emit on a block output.
#[derive(Debug, Clone)]
pub struct OutgoingEvent {
    /// Output to emit on.
    pub output_key: String,
    /// Event body.
    pub payload: Value,
    /// Event that caused this one, for traceability.
    pub parent_event_id: Option<EventId>,
    /// Pending event this emission resolves.
    pub complete: Option<PendingEventId>,
}

impl OutgoingEvent {
    /// Event on `output_key` with no parent and no pending resolution.
    pub fn new(output_key: impl Into<String>, payload: Value) -> Self {
        Self {
            output_key: output_key.into(),
            payload,
            parent_event_id: None,
            complete: None,
        }
    }

    /// Link this event to the event that caused it.
    pub fn with_parent(mut self, parent: Option<EventId>) -> Self {
        self.parent_event_id = parent;
        self
    }

    /// Resolve `pending` with this emission.
    pub fn completing(mut self, pending: PendingEventId) -> Self {
        self.complete = Some(pending);
        self
    }
}

/// An event as recorded by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    /// Event identifier.
    pub id: EventId,
    /// Block instance that emitted it.
    pub block_id: String,
    /// Output it was emitted on.
    pub output_key: String,
    /// Event body.
    pub payload: Value,
    /// Causing event, if any.
    pub parent_event_id: Option<EventId>,
    /// Pending event resolved by this emission, if any.
    pub completes: Option<PendingEventId>,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

/// A pending event as recorded by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEventRecord {
    /// Handle.
    pub id: PendingEventId,
    /// Block instance that announced it.
    pub block_id: String,
    /// Output the resolution is emitted on.
    pub output_key: String,
    /// Preview payload.
    pub payload: Value,
    /// Latest progress text.
    pub status_description: String,
    /// Lifecycle state.
    pub state: PendingState,
    /// Reason given when cancelled.
    pub cancel_reason: Option<String>,
    /// When it was announced.
    pub created_at: DateTime<Utc>,
    /// When it was completed or cancelled.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Event publishing interface used by blocks.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Announce a pending event and return its handle.
    async fn create_pending(
        &self,
        block_id: &str,
        pending: NewPendingEvent,
    ) -> Result<PendingEventId>;

    /// Replace the progress text of an unresolved pending event.
    async fn update_pending(&self, id: &PendingEventId, status_description: &str) -> Result<()>;

    /// Emit an event. When `event.complete` is set, the named pending event
    /// is resolved atomically with the emission.
    async fn emit(&self, block_id: &str, event: OutgoingEvent) -> Result<EventId>;

    /// Resolve a pending event by cancelling it.
    async fn cancel_pending(&self, id: &PendingEventId, reason: &str) -> Result<()>;

    /// Look up a pending event.
    async fn get_pending(&self, id: &PendingEventId) -> Result<Option<PendingEventRecord>>;

    /// Delete pending events resolved before `before` and emitted events
    /// recorded before `before`. Unresolved pending events are kept.
    ///
    /// Returns the number of records removed.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64>;
}
