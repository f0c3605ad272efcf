// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spaceflow Server - Spacelift integration host
//!
//! Hosts Spacelift automation blocks and connects them to Spacelift:
//!
//! ```text
//!   Spacelift ──signed webhook──► POST /webhook ──► Dispatcher ──► run/task blocks
//!       ▲                                              │
//!       └──────── GraphQL (runTrigger, taskCreate) ◄───┘
//!
//!   cron 0 * * * * ──► ReaperWorker ──► Dispatcher ──► schedule handlers
//! ```
//!
//! # Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | Environment configuration |
//! | [`signature`] | `X-Signature-256` verification |
//! | [`provisioner`] | Webhook and notification policy reconciliation |
//! | [`dispatcher`] | Per-instance serialized delivery to blocks |
//! | [`http`] | axum router |
//! | [`webhook_queue`] | Ordered hand-off of webhooks to the dispatcher |
//! | [`reaper`] | Scheduled stale-record cleanup |
//! | [`runtime`] | Embeddable runtime with graceful shutdown |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Delivery of events, webhooks and ticks to block instances.
pub mod dispatcher;

/// Error types for server operations.
pub mod error;

/// HTTP router and handlers.
pub mod http;

/// Installation provisioning.
pub mod provisioner;

/// Scheduled reaper worker.
pub mod reaper;

/// Embeddable runtime.
pub mod runtime;

/// Webhook signature verification.
pub mod signature;

/// Ordered webhook delivery.
pub mod webhook_queue;

pub use error::{Error, Result};
