// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for spaceflow-blocks.

use spaceflow_client::ClientError;
use spaceflow_host::HostError;
use thiserror::Error;

/// Block handler errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockError {
    /// Missing or malformed caller-supplied inputs.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The Spacelift call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Host KV or event operation failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// An inbound message could not be interpreted.
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// No block is registered under this type id.
    #[error("Unknown block type: {0}")]
    UnknownBlockType(String),
}

impl BlockError {
    /// True for errors caused by the caller rather than Spacelift or the host.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BlockError::Validation(_) | BlockError::Client(ClientError::Validation(_))
        )
    }
}

/// Result type using BlockError.
pub type Result<T> = std::result::Result<T, BlockError>;
