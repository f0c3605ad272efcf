// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authenticated GraphQL execution.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use spaceflow_host::KvNamespace;
use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::error::{ClientError, Result};
use crate::graphql;
use crate::token_cache::TokenCache;

/// Default HTTP timeout for GraphQL requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Spacelift GraphQL client.
///
/// Cheap to clone; the HTTP connection pool and token cache are shared.
#[derive(Debug, Clone)]
pub struct SpaceliftClient {
    http: reqwest::Client,
    tokens: TokenCache,
}

impl SpaceliftClient {
    /// Create a client caching tokens in the given app-scoped KV namespace.
    pub fn new(app_kv: KvNamespace) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self::with_http_client(http, app_kv))
    }

    /// Create a client around an existing `reqwest::Client`.
    pub fn with_http_client(http: reqwest::Client, app_kv: KvNamespace) -> Self {
        Self {
            tokens: TokenCache::new(http.clone(), app_kv),
            http,
        }
    }

    /// Execute `query` with `variables` and decode `data` as `T`.
    ///
    /// Any entry in the response's `errors` array fails the call with the
    /// messages joined by `", "`. A response without `data` fails too.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        query: &str,
        variables: Value,
    ) -> Result<T> {
        let token = self.tokens.get_token(credentials).await?;
        let url = credentials.graphql_url();

        let response =
            graphql::post(&self.http, &url, Some(&token), query, &variables).await?;

        if let Some(messages) = response.error_messages() {
            warn!(endpoint = %credentials.endpoint, errors = %messages, "Spacelift GraphQL call failed");
            return Err(ClientError::GraphQl(messages));
        }

        let data = response
            .data
            .filter(|d| !d.is_null())
            .ok_or_else(|| ClientError::Protocol("No data returned from GraphQL".to_string()))?;

        debug!(endpoint = %credentials.endpoint, "Spacelift GraphQL call succeeded");

        serde_json::from_value(data)
            .map_err(|e| ClientError::Protocol(format!("Unexpected GraphQL data shape: {}", e)))
    }
}
