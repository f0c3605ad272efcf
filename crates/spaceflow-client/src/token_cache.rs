// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bearer token cache.
//!
//! Spacelift issues a short-lived JWT in exchange for an API key via the
//! `apiKeyUser` mutation. The token is stored in app-scoped KV under
//! `spacelift_jwt_<endpoint>_<apiKeyId>` with a TTL that expires it five
//! minutes before the server does, so callers never hold a token that is
//! about to lapse mid-request.
//!
//! Concurrent misses may each mint a token; the last write wins. Both tokens
//! are valid, so no locking is done.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use spaceflow_host::KvNamespace;
use tracing::{debug, info};

use crate::credentials::Credentials;
use crate::error::{ClientError, Result};
use crate::graphql;

/// Seconds subtracted from the server-reported expiry.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Lower bound on the cache TTL.
pub const MIN_TTL_SECS: i64 = 60;

const API_KEY_USER_MUTATION: &str = r#"
mutation GetSpaceliftToken($id: ID!, $secret: String!) {
  apiKeyUser(id: $id, secret: $secret) {
    jwt
    validUntil
  }
}
"#;

#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    jwt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyUserData {
    api_key_user: Option<ApiKeyUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyUser {
    jwt: Option<String>,
    valid_until: Option<i64>,
}

/// Cache TTL in seconds for a token expiring at `valid_until` (epoch seconds).
pub fn compute_ttl(valid_until: i64, now: i64) -> i64 {
    (valid_until - now - REFRESH_MARGIN_SECS).max(MIN_TTL_SECS)
}

/// KV key a token for `credentials` is cached under.
pub fn cache_key(credentials: &Credentials) -> String {
    format!(
        "spacelift_jwt_{}_{}",
        credentials.endpoint, credentials.api_key_id
    )
}

/// Caches API-key-exchanged JWTs in app KV.
#[derive(Debug, Clone)]
pub struct TokenCache {
    http: reqwest::Client,
    kv: KvNamespace,
}

impl TokenCache {
    /// Create a cache over app-scoped KV.
    pub fn new(http: reqwest::Client, kv: KvNamespace) -> Self {
        Self { http, kv }
    }

    /// Return a valid bearer token, exchanging the API key on a miss.
    pub async fn get_token(&self, credentials: &Credentials) -> Result<String> {
        let key = cache_key(credentials);

        if let Some(cached) = self.kv.get::<CachedToken>(&key).await? {
            debug!(endpoint = %credentials.endpoint, "Using cached Spacelift token");
            return Ok(cached.jwt);
        }

        let (jwt, valid_until) = self.exchange(credentials).await?;
        let now = chrono::Utc::now().timestamp();
        let ttl = compute_ttl(valid_until, now);

        self.kv
            .set(
                &key,
                &CachedToken { jwt: jwt.clone() },
                Some(Duration::from_secs(ttl as u64)),
            )
            .await?;

        info!(
            endpoint = %credentials.endpoint,
            api_key_id = %credentials.api_key_id,
            ttl_secs = ttl,
            "Obtained new Spacelift token"
        );

        Ok(jwt)
    }

    async fn exchange(&self, credentials: &Credentials) -> Result<(String, i64)> {
        let variables = json!({
            "id": credentials.api_key_id,
            "secret": credentials.api_key_secret,
        });

        let response = graphql::post(
            &self.http,
            &credentials.graphql_url(),
            None,
            API_KEY_USER_MUTATION,
            &variables,
        )
        .await?;

        if let Some(messages) = response.error_messages() {
            return Err(ClientError::Authentication(messages));
        }

        let user = response
            .data
            .map(serde_json::from_value::<ApiKeyUserData>)
            .transpose()
            .map_err(|e| ClientError::Protocol(format!("Invalid apiKeyUser response: {}", e)))?
            .and_then(|data| data.api_key_user);

        match user {
            Some(ApiKeyUser {
                jwt: Some(jwt),
                valid_until: Some(valid_until),
            }) if !jwt.is_empty() => Ok((jwt, valid_until)),
            _ => Err(ClientError::Protocol(
                "Invalid response from Spacelift authentication".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_subtracts_refresh_margin() {
        assert_eq!(compute_ttl(1_400, 1_000), 100);
        assert_eq!(compute_ttl(1_000 + 3_600, 1_000), 3_300);
    }

    #[test]
    fn test_ttl_has_floor() {
        assert_eq!(compute_ttl(1_100, 1_000), 60);
        assert_eq!(compute_ttl(500, 1_000), 60);
        assert_eq!(compute_ttl(1_360, 1_000), 60);
    }

    #[test]
    fn test_cache_key_format() {
        let creds = Credentials {
            api_key_id: "01HKEY".into(),
            api_key_secret: "x".into(),
            endpoint: "acme.app.spacelift.io".into(),
        };
        assert_eq!(
            cache_key(&creds),
            "spacelift_jwt_acme.app.spacelift.io_01HKEY"
        );
    }
}
