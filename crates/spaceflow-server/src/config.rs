// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for spaceflow-server.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde_json::Value;
use spaceflow_client::AppConfig;

/// A block instance to host.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSpec {
    /// Instance id, unique within the installation.
    pub id: String,
    /// Registered block type, e.g. `triggerRun`.
    pub block_type: String,
    /// Per-instance configuration (`null` when none was given).
    pub config: Value,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Spacelift installation settings
    pub app_config: AppConfig,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Externally reachable webhook URL registered with Spacelift
    pub public_url: String,
    /// Installation URL used in human-readable webhook and policy names
    pub installation_url: String,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Hosted block instances
    pub blocks: Vec<BlockSpec>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_config = AppConfig {
            api_key_id: Some(required("SPACEFLOW_API_KEY_ID")?),
            api_key_secret: Some(required("SPACEFLOW_API_KEY_SECRET")?),
            endpoint: Some(required("SPACEFLOW_ENDPOINT")?),
            // Checked by the provisioner, which reports a failed status instead
            space_id: std::env::var("SPACEFLOW_SPACE_ID")
                .ok()
                .filter(|v| !v.is_empty()),
        };

        let port: u16 = std::env::var("SPACEFLOW_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let public_url = std::env::var("SPACEFLOW_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}/webhook", port));

        let installation_url =
            std::env::var("SPACEFLOW_INSTALLATION_URL").unwrap_or_else(|_| public_url.clone());

        let database_path = PathBuf::from(
            std::env::var("SPACEFLOW_DATABASE_PATH")
                .unwrap_or_else(|_| ".data/spaceflow.db".to_string()),
        );

        let mut blocks = parse_block_specs(&std::env::var("SPACEFLOW_BLOCKS").unwrap_or_default())?;
        for spec in &mut blocks {
            if let Ok(raw) = std::env::var(block_config_var(&spec.id)) {
                spec.config =
                    serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidBlockConfig {
                        id: spec.id.clone(),
                        message: e.to_string(),
                    })?;
            }
        }

        Ok(Self {
            app_config,
            http_addr,
            public_url,
            installation_url,
            database_path,
            blocks,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingEnvVar(name))
}

/// Parse `id=typeId[,id=typeId...]`. Whitespace around entries is ignored.
pub fn parse_block_specs(raw: &str) -> Result<Vec<BlockSpec>, ConfigError> {
    let mut specs: Vec<BlockSpec> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, block_type) = entry
            .split_once('=')
            .map(|(id, ty)| (id.trim(), ty.trim()))
            .filter(|(id, ty)| !id.is_empty() && !ty.is_empty())
            .ok_or_else(|| ConfigError::InvalidBlockSpec(entry.to_string()))?;

        if specs.iter().any(|s| s.id == id) {
            return Err(ConfigError::InvalidBlockSpec(format!(
                "duplicate block id '{}'",
                id
            )));
        }

        specs.push(BlockSpec {
            id: id.to_string(),
            block_type: block_type.to_string(),
            config: Value::Null,
        });
    }

    Ok(specs)
}

/// Environment variable holding the JSON configuration of block `id`.
pub fn block_config_var(id: &str) -> String {
    let suffix: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SPACEFLOW_BLOCK_CONFIG_{}", suffix)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// An entry of `SPACEFLOW_BLOCKS` is malformed.
    #[error("Invalid SPACEFLOW_BLOCKS entry: {0}")]
    InvalidBlockSpec(String),
    /// A block configuration is not valid JSON.
    #[error("Invalid configuration for block '{id}': {message}")]
    InvalidBlockConfig {
        /// Block instance id.
        id: String,
        /// Parser message.
        message: String,
    },
}
