// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed host store.
//!
//! One pool serves both the KV namespace and the event journal. Timestamps
//! are stored as epoch milliseconds; JSON values as text.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::{HostError, Result};
use crate::events::{
    EmittedEvent, EventId, EventSink, NewPendingEvent, OutgoingEvent, PendingEventId,
    PendingEventRecord, PendingState,
};
use crate::kv::{KvEntry, KvStore};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    id: String,
    block_id: String,
    output_key: String,
    payload: String,
    status_description: String,
    state: String,
    cancel_reason: Option<String>,
    created_at: i64,
    resolved_at: Option<i64>,
}

impl PendingRow {
    fn into_record(self) -> Result<PendingEventRecord> {
        Ok(PendingEventRecord {
            id: PendingEventId(self.id),
            block_id: self.block_id,
            output_key: self.output_key,
            payload: serde_json::from_str(&self.payload)?,
            status_description: self.status_description,
            state: PendingState::parse(&self.state),
            cancel_reason: self.cancel_reason,
            created_at: from_millis(self.created_at),
            resolved_at: self.resolved_at.map(from_millis),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    block_id: String,
    output_key: String,
    payload: String,
    parent_event_id: Option<String>,
    completes: Option<String>,
    created_at: i64,
}

impl EventRow {
    fn into_event(self) -> Result<EmittedEvent> {
        Ok(EmittedEvent {
            id: EventId(self.id),
            block_id: self.block_id,
            output_key: self.output_key,
            payload: serde_json::from_str(&self.payload)?,
            parent_event_id: self.parent_event_id.map(EventId),
            completes: self.completes.map(PendingEventId),
            created_at: from_millis(self.created_at),
        })
    }
}

/// SQLite-backed KV store and event sink.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    ///
    /// Parent directories are created when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory database, migrated and ready.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Events emitted by one block instance, oldest first.
    pub async fn list_events(&self, block_id: &str) -> Result<Vec<EmittedEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, block_id, output_key, payload, parent_event_id, completes, created_at
            FROM events
            WHERE block_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(block_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Move a pending event out of `pending`, or report why it cannot be.
    async fn resolve_pending(
        tx: &mut Transaction<'_, Sqlite>,
        id: &PendingEventId,
        state: PendingState,
        cancel_reason: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_events
            SET state = ?1, cancel_reason = ?2, resolved_at = ?3
            WHERE id = ?4 AND state = 'pending'
            "#,
        )
        .bind(state.as_str())
        .bind(cancel_reason)
        .bind(now_millis())
        .bind(id.as_str())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT state FROM pending_events WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&mut **tx)
                .await?;

        Err(match exists {
            Some(_) => HostError::PendingAlreadyResolved(id.to_string()),
            None => HostError::PendingNotFound(id.to_string()),
        })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = now_millis();
        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT value, expires_at FROM kv_entries WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= now => {
                sqlx::query("DELETE FROM kv_entries WHERE key = ?1 AND expires_at <= ?2")
                    .bind(key)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl.as_millis() as i64));

        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            sqlx::query("DELETE FROM kv_entries WHERE key = ?1")
                .bind(key)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvEntry>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT key, value
            FROM kv_entries
            WHERE substr(key, 1, length(?1)) = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
            ORDER BY key ASC
            "#,
        )
        .bind(prefix)
        .bind(now_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(key, value)| {
                Ok(KvEntry {
                    key,
                    value: serde_json::from_str(&value)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for SqliteStore {
    async fn create_pending(
        &self,
        block_id: &str,
        pending: NewPendingEvent,
    ) -> Result<PendingEventId> {
        let id = PendingEventId::generate();

        sqlx::query(
            r#"
            INSERT INTO pending_events (id, block_id, output_key, payload, status_description, state, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)
            "#,
        )
        .bind(id.as_str())
        .bind(block_id)
        .bind(&pending.output_key)
        .bind(serde_json::to_string(&pending.payload)?)
        .bind(&pending.status_description)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_pending(&self, id: &PendingEventId, status_description: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pending_events SET status_description = ?1 WHERE id = ?2 AND state = 'pending'",
        )
        .bind(status_description)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_pending(id).await? {
            Some(_) => Err(HostError::PendingAlreadyResolved(id.to_string())),
            None => Err(HostError::PendingNotFound(id.to_string())),
        }
    }

    async fn emit(&self, block_id: &str, event: OutgoingEvent) -> Result<EventId> {
        let id = EventId::generate();
        let mut tx = self.pool.begin().await?;

        if let Some(pending) = &event.complete
            && let Err(e) =
                Self::resolve_pending(&mut tx, pending, PendingState::Completed, None).await
        {
            tx.rollback().await?;
            return Err(e);
        }

        sqlx::query(
            r#"
            INSERT INTO events (id, block_id, output_key, payload, parent_event_id, completes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(id.as_str())
        .bind(block_id)
        .bind(&event.output_key)
        .bind(serde_json::to_string(&event.payload)?)
        .bind(event.parent_event_id.as_ref().map(|p| p.as_str()))
        .bind(event.complete.as_ref().map(|p| p.as_str()))
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn cancel_pending(&self, id: &PendingEventId, reason: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Err(e) =
            Self::resolve_pending(&mut tx, id, PendingState::Cancelled, Some(reason)).await
        {
            tx.rollback().await?;
            return Err(e);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_pending(&self, id: &PendingEventId) -> Result<Option<PendingEventRecord>> {
        let row = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT id, block_id, output_key, payload, status_description, state, cancel_reason,
                   created_at, resolved_at
            FROM pending_events
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PendingRow::into_record).transpose()
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let cutoff = before.timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let pending = sqlx::query(
            "DELETE FROM pending_events WHERE state != 'pending' AND resolved_at < ?1",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let events = sqlx::query("DELETE FROM events WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let removed = pending.rows_affected() + events.rows_affected();
        if removed > 0 {
            debug!(
                pending_events = pending.rows_affected(),
                events = events.rows_affected(),
                "Pruned resolved host records"
            );
        }
        Ok(removed)
    }
}
