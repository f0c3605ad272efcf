// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GraphQL wire envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Request body: `{query, variables}`.
#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a> {
    /// Static GraphQL document.
    pub query: &'a str,
    /// Variables substituted by the server.
    pub variables: &'a Value,
}

/// One entry of a response's `errors` array.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorEntry {
    /// Server-side message.
    pub message: String,
    /// Vendor extensions, kept for logging.
    #[serde(default)]
    pub extensions: Option<Value>,
}

/// Response body with untyped data.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse {
    /// Query result; absent or `null` when the query failed.
    #[serde(default)]
    pub data: Option<Value>,
    /// Application errors.
    #[serde(default)]
    pub errors: Option<Vec<GraphQlErrorEntry>>,
}

impl GraphQlResponse {
    /// Server messages joined with `", "`, if the errors array is non-empty.
    pub fn error_messages(&self) -> Option<String> {
        self.errors
            .as_ref()
            .filter(|errors| !errors.is_empty())
            .map(|errors| {
                errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
    }
}

/// POST one document to `url`, optionally with a bearer token.
///
/// The HTTP status is not inspected: GraphQL servers report failures in the
/// body. A body that is not a GraphQL envelope is a protocol error.
pub async fn post(
    http: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    query: &str,
    variables: &Value,
) -> Result<GraphQlResponse> {
    let mut request = http
        .post(url)
        .header("Content-Type", "application/json")
        .json(&GraphQlRequest { query, variables });

    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;

    debug!(url = %url, status = status.as_u16(), bytes = body.len(), "GraphQL response received");

    serde_json::from_slice(&body).map_err(|e| {
        ClientError::Protocol(format!(
            "Unparseable GraphQL response (HTTP {}): {}",
            status.as_u16(),
            e
        ))
    })
}
