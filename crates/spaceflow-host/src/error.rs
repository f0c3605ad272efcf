// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for spaceflow-host.

use thiserror::Error;

/// Host errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pending event was never created.
    #[error("Pending event not found: {0}")]
    PendingNotFound(String),

    /// Pending event was already completed or cancelled.
    #[error("Pending event '{0}' is already resolved")]
    PendingAlreadyResolved(String),
}

/// Result type using HostError.
pub type Result<T> = std::result::Result<T, HostError>;
