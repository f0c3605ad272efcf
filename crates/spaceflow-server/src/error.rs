// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for spaceflow-server.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Webhook signature verification failed.
    #[error("Signature error: {0}")]
    Signature(#[from] crate::signature::SignatureError),

    /// Host storage operation failed.
    #[error("Host error: {0}")]
    Host(#[from] spaceflow_host::HostError),

    /// Spacelift API call failed.
    #[error("Spacelift error: {0}")]
    Client(#[from] spaceflow_client::ClientError),

    /// Block handler failed.
    #[error("Block error: {0}")]
    Block(#[from] spaceflow_blocks::BlockError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Block instance was not found.
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using server Error.
pub type Result<T> = std::result::Result<T, Error>;
