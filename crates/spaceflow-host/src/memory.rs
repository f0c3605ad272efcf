// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory backends.
//!
//! State lives for the lifetime of the process. Useful for tests, and for
//! embedding blocks where durability is handled elsewhere.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{HostError, Result};
use crate::events::{
    EmittedEvent, EventId, EventSink, NewPendingEvent, OutgoingEvent, PendingEventId,
    PendingEventRecord, PendingState,
};
use crate::kv::{KvEntry, KvStore};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// KV store backed by a concurrent hash map.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now();
        let live = self
            .entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone());

        if live.is_none() {
            // Lazily evict so expired tokens do not accumulate.
            self.entries.remove_if(key, |_, stored| !stored.is_live(now));
        }

        Ok(live)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        let now = Utc::now();
        let mut entries: Vec<KvEntry> = self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix) && item.value().is_live(now))
            .map(|item| KvEntry {
                key: item.key().clone(),
                value: item.value().value.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[derive(Debug, Default)]
struct EventJournal {
    emitted: Vec<EmittedEvent>,
    pending: HashMap<PendingEventId, PendingEventRecord>,
}

impl EventJournal {
    fn unresolved_mut(&mut self, id: &PendingEventId) -> Result<&mut PendingEventRecord> {
        match self.pending.get_mut(id) {
            None => Err(HostError::PendingNotFound(id.to_string())),
            Some(record) if record.state != PendingState::Pending => {
                Err(HostError::PendingAlreadyResolved(id.to_string()))
            }
            Some(record) => Ok(record),
        }
    }
}

/// Event sink that keeps every event in memory and exposes it for
/// inspection.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    journal: Mutex<EventJournal>,
}

impl MemoryEventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All emitted events, oldest first.
    pub async fn emitted(&self) -> Vec<EmittedEvent> {
        self.journal.lock().await.emitted.clone()
    }

    /// Emitted events on one output, oldest first.
    pub async fn emitted_on(&self, output_key: &str) -> Vec<EmittedEvent> {
        self.journal
            .lock()
            .await
            .emitted
            .iter()
            .filter(|e| e.output_key == output_key)
            .cloned()
            .collect()
    }

    /// All pending events regardless of state.
    pub async fn pending_events(&self) -> Vec<PendingEventRecord> {
        let journal = self.journal.lock().await;
        let mut records: Vec<PendingEventRecord> = journal.pending.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn create_pending(
        &self,
        block_id: &str,
        pending: NewPendingEvent,
    ) -> Result<PendingEventId> {
        let id = PendingEventId::generate();
        let record = PendingEventRecord {
            id: id.clone(),
            block_id: block_id.to_string(),
            output_key: pending.output_key,
            payload: pending.payload,
            status_description: pending.status_description,
            state: PendingState::Pending,
            cancel_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.journal.lock().await.pending.insert(id.clone(), record);
        Ok(id)
    }

    async fn update_pending(&self, id: &PendingEventId, status_description: &str) -> Result<()> {
        let mut journal = self.journal.lock().await;
        journal.unresolved_mut(id)?.status_description = status_description.to_string();
        Ok(())
    }

    async fn emit(&self, block_id: &str, event: OutgoingEvent) -> Result<EventId> {
        let mut journal = self.journal.lock().await;

        if let Some(pending) = &event.complete {
            let record = journal.unresolved_mut(pending)?;
            record.state = PendingState::Completed;
            record.resolved_at = Some(Utc::now());
        }

        let id = EventId::generate();
        journal.emitted.push(EmittedEvent {
            id: id.clone(),
            block_id: block_id.to_string(),
            output_key: event.output_key,
            payload: event.payload,
            parent_event_id: event.parent_event_id,
            completes: event.complete,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn cancel_pending(&self, id: &PendingEventId, reason: &str) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let record = journal.unresolved_mut(id)?;
        record.state = PendingState::Cancelled;
        record.cancel_reason = Some(reason.to_string());
        record.resolved_at = Some(Utc::now());
        Ok(())
    }

    async fn get_pending(&self, id: &PendingEventId) -> Result<Option<PendingEventRecord>> {
        Ok(self.journal.lock().await.pending.get(id).cloned())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut journal = self.journal.lock().await;

        let pending_before = journal.pending.len();
        journal
            .pending
            .retain(|_, r| r.resolved_at.is_none_or(|at| at >= before));

        let emitted_before = journal.emitted.len();
        journal.emitted.retain(|e| e.created_at >= before);

        Ok((pending_before - journal.pending.len() + emitted_before - journal.emitted.len()) as u64)
    }
}
