// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App configuration and API key credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Configuration of one app installation.
///
/// Fields are optional here; each consumer validates what it needs.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Spacelift API key id.
    #[serde(default)]
    pub api_key_id: Option<String>,
    /// Spacelift API key secret.
    #[serde(default)]
    pub api_key_secret: Option<String>,
    /// Account endpoint host, e.g. `acme.app.spacelift.io`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Space the webhook and notification policy are created in.
    #[serde(default)]
    pub space_id: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &self.api_key_secret.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .field("space_id", &self.space_id)
            .finish()
    }
}

/// API key credentials for one Spacelift account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// API key id.
    pub api_key_id: String,
    /// API key secret.
    pub api_key_secret: String,
    /// Account endpoint host.
    pub endpoint: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &"***")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Credentials {
    /// Extract credentials from app configuration.
    ///
    /// Called on every use; credentials are never persisted.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        match (
            non_empty(&config.api_key_id),
            non_empty(&config.api_key_secret),
            non_empty(&config.endpoint),
        ) {
            (Some(id), Some(secret), Some(endpoint)) => Ok(Self {
                api_key_id: id.to_string(),
                api_key_secret: secret.to_string(),
                endpoint: endpoint.to_string(),
            }),
            _ => Err(ClientError::Validation(
                "Missing required Spacelift credentials in app config".to_string(),
            )),
        }
    }

    /// GraphQL URL for this account.
    ///
    /// A bare host gets `https://`; an endpoint that already names a scheme
    /// is used as given.
    pub fn graphql_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}/graphql", base)
        } else {
            format!("https://{}/graphql", base)
        }
    }
}
