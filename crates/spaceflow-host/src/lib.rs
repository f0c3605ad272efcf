// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spaceflow Host - primitives the blocks run against
//!
//! Blocks never talk to storage directly. They receive a [`kv::KvNamespace`]
//! scoped to either the app installation or their own block instance, and an
//! [`events::EventSink`] for publishing events and managing pending events.
//!
//! # Key layout
//!
//! ```text
//! app/<key>                  app-wide state (token cache, webhook, policy id)
//! block/<block_id>/<key>     per-instance state (correlation records)
//! ```
//!
//! # Backends
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`sqlite::SqliteStore`] | Durable single-node host (the server binary) |
//! | [`memory::MemoryKvStore`] / [`memory::MemoryEventSink`] | Tests and embedding |
//!
//! The KV contract is deliberately small: atomic single-key get/set/delete
//! and prefix listing. There are no multi-key transactions.

#![deny(missing_docs)]

/// Error types for host operations.
pub mod error;

/// Event publishing and pending-event lifecycle.
pub mod events;

/// Key-value store abstraction with TTL and namespaces.
pub mod kv;

/// In-memory backends.
pub mod memory;

/// SQLite-backed store implementing both KV and events.
pub mod sqlite;

pub use error::{HostError, Result};
pub use events::{EventId, EventSink, NewPendingEvent, OutgoingEvent, PendingEventId};
pub use kv::{KvNamespace, KvStore};
