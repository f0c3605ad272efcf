// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for spaceflow-client.

use spaceflow_host::HostError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// API key exchange was rejected, or returned no usable token.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The response did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server returned application errors for the query.
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// Caller-supplied configuration or identifiers were missing or invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The HTTP request itself failed.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Token cache storage failed.
    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// Result type using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
