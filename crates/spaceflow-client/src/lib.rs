// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Spacelift GraphQL client.
//!
//! Every call goes through [`SpaceliftClient::execute`], which obtains a
//! bearer token from the [`TokenCache`] (exchanging the API key only on a
//! cache miss) and posts a static GraphQL document with its variables to
//! `https://<endpoint>/graphql`.
//!
//! No call is ever retried here. Retry policy belongs to the caller.

pub mod client;
pub mod credentials;
pub mod error;
pub mod graphql;
pub mod token_cache;

pub use client::SpaceliftClient;
pub use credentials::{AppConfig, Credentials};
pub use error::{ClientError, Result};
pub use token_cache::TokenCache;
