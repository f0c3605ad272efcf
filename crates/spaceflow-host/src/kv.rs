// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Key-value store abstraction.
//!
//! Backends store JSON values under flat string keys. Scoping into app and
//! block namespaces happens in [`KvNamespace`], so backends never need to
//! know about block instances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

/// A raw key/value pair returned by prefix listing.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    /// Full key, including any namespace prefix.
    pub key: String,
    /// Stored JSON value.
    pub value: Value,
}

/// Storage interface used by the host.
///
/// Every operation is atomic for a single key. Entries written with a TTL
/// disappear from `get` and `list` once it elapses; there is no explicit
/// expiry callback.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one. `ttl = None` never expires.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Delete keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// List live entries whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KvEntry>>;
}

/// A view of a [`KvStore`] restricted to one namespace.
///
/// Keys passed to and returned from a namespace are relative to it.
#[derive(Clone)]
pub struct KvNamespace {
    store: Arc<dyn KvStore>,
    prefix: String,
}

impl std::fmt::Debug for KvNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvNamespace")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl KvNamespace {
    /// The app-wide namespace shared by every block of an installation.
    pub fn app(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            prefix: "app/".to_string(),
        }
    }

    /// The private namespace of one block instance.
    pub fn block(store: Arc<dyn KvStore>, block_id: &str) -> Self {
        Self {
            store,
            prefix: format!("block/{}/", block_id),
        }
    }

    /// Namespace prefix, including the trailing slash.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read and deserialize a value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(&self.scoped(key)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store.set(&self.scoped(key), value, ttl).await
    }

    /// Delete keys in this namespace.
    pub async fn delete(&self, keys: &[&str]) -> Result<()> {
        let scoped: Vec<String> = keys.iter().map(|k| self.scoped(k)).collect();
        self.store.delete(&scoped).await
    }

    /// List entries under `prefix`, returning namespace-relative keys.
    pub async fn list<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let entries = self.store.list(&self.scoped(prefix)).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = entry
                .key
                .strip_prefix(&self.prefix)
                .unwrap_or(&entry.key)
                .to_string();
            out.push((key, serde_json::from_value(entry.value)?));
        }
        Ok(out)
    }
}
