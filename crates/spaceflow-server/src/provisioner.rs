// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installation provisioning.
//!
//! Every sync makes sure Spacelift delivers run notifications to this
//! installation:
//!
//! 1. A recorded webhook is looked up remotely. If it is gone (or the lookup
//!    fails) the record is dropped; otherwise its attributes are re-applied.
//! 2. Without a webhook, one is created with a fresh secret and recorded as
//!    `{id, secret}` under `webhook`.
//! 3. Without a recorded policy id, a `NOTIFICATION` policy routing every
//!    notification to the webhook is created and its id recorded under
//!    `notificationPolicyId`. A recorded policy is never recreated.
//!
//! Failures end the sync with a short status description; the underlying
//! error is only logged. Nothing is rolled back.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use spaceflow_client::{AppConfig, ClientError, Credentials, SpaceliftClient};
use spaceflow_host::{HostError, KvNamespace};
use thiserror::Error;
use tracing::{error, info, warn};

/// App KV key of the webhook registration.
pub const WEBHOOK_KEY: &str = "webhook";

/// App KV key of the notification policy id.
pub const POLICY_KEY: &str = "notificationPolicyId";

const WEBHOOK_LABEL: &str = "flows";

const GET_WEBHOOK_QUERY: &str = r#"
query GetNamedWebhook($id: ID!) {
  namedWebhooksIntegration(id: $id) {
    id
    enabled
    endpoint
    space {
      id
    }
  }
}
"#;

const CREATE_WEBHOOK_MUTATION: &str = r#"
mutation CreateNamedWebhook($input: NamedWebhooksIntegrationInput!) {
  namedWebhooksIntegrationCreate(input: $input) {
    id
    name
    endpoint
    enabled
  }
}
"#;

const UPDATE_WEBHOOK_MUTATION: &str = r#"
mutation UpdateNamedWebhook($id: ID!, $input: NamedWebhooksIntegrationInput!) {
  namedWebhooksIntegrationUpdate(id: $id, input: $input) {
    id
    name
  }
}
"#;

const CREATE_POLICY_MUTATION: &str = r#"
mutation CreatePolicy($input: PolicyCreateInput!) {
  policyCreatev2(input: $input) {
    id
    name
    body
    type
  }
}
"#;

/// Installation status reported after a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "description", rename_all = "lowercase")]
pub enum AppStatus {
    /// Sync has not finished yet.
    Pending,
    /// Webhook and policy are in place.
    Ready,
    /// Sync failed; the description never carries error details.
    Failed(String),
}

/// Webhook registration persisted in the app KV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    /// Remote integration id.
    pub id: String,
    /// HMAC secret shared with Spacelift.
    pub secret: String,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetWebhookData {
    named_webhooks_integration: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWebhookData {
    named_webhooks_integration_create: IdRef,
}

#[derive(Debug, Deserialize)]
struct CreatePolicyData {
    #[serde(rename = "policyCreatev2")]
    policy_create_v2: IdRef,
}

/// Step of a sync that failed.
#[derive(Debug, Error)]
enum SyncError {
    #[error("webhook creation failed: {0}")]
    Webhook(#[source] ClientError),

    #[error("policy creation failed: {0}")]
    Policy(#[source] ClientError),

    #[error("setup failed: {0}")]
    Setup(String),
}

impl SyncError {
    fn status_description(&self) -> &'static str {
        match self {
            SyncError::Webhook(_) => "Failed to create webhook",
            SyncError::Policy(_) => "Failed to create notification policy",
            SyncError::Setup(_) => "Setup failed",
        }
    }
}

impl From<HostError> for SyncError {
    fn from(e: HostError) -> Self {
        SyncError::Setup(e.to_string())
    }
}

impl From<ClientError> for SyncError {
    fn from(e: ClientError) -> Self {
        SyncError::Setup(e.to_string())
    }
}

/// Provisions the webhook and notification policy of one installation.
pub struct Provisioner {
    client: SpaceliftClient,
    app_kv: KvNamespace,
    app_config: AppConfig,
    webhook_url: String,
    installation_url: String,
}

impl Provisioner {
    /// Create a provisioner.
    ///
    /// `webhook_url` is where Spacelift delivers notifications;
    /// `installation_url` only appears in display names.
    pub fn new(
        client: SpaceliftClient,
        app_kv: KvNamespace,
        app_config: AppConfig,
        webhook_url: impl Into<String>,
        installation_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            app_kv,
            app_config,
            webhook_url: webhook_url.into(),
            installation_url: installation_url.into(),
        }
    }

    /// Reconcile remote state and report the resulting status.
    pub async fn sync(&self) -> AppStatus {
        let Some(space_id) = self
            .app_config
            .space_id
            .as_deref()
            .filter(|s| !s.is_empty())
        else {
            warn!("Installation sync failed: no space id configured");
            return AppStatus::Failed("Missing space ID".to_string());
        };

        match self.reconcile(space_id).await {
            Ok(()) => {
                info!(space_id = %space_id, "Installation sync complete");
                AppStatus::Ready
            }
            Err(e) => {
                error!(space_id = %space_id, error = %e, "Installation sync failed");
                AppStatus::Failed(e.status_description().to_string())
            }
        }
    }

    async fn reconcile(&self, space_id: &str) -> Result<(), SyncError> {
        let credentials = Credentials::from_config(&self.app_config)?;

        let mut webhook: Option<WebhookRegistration> = self.app_kv.get(WEBHOOK_KEY).await?;
        let policy_id: Option<String> = self.app_kv.get(POLICY_KEY).await?;

        if let Some(existing) = webhook.take() {
            match self.refresh_webhook(&credentials, space_id, &existing).await {
                Ok(true) => webhook = Some(existing),
                Ok(false) => {
                    warn!(webhook_id = %existing.id, "Recorded webhook no longer exists, recreating");
                    self.app_kv.delete(&[WEBHOOK_KEY]).await?;
                }
                Err(e) => {
                    warn!(webhook_id = %existing.id, error = %e, "Failed to refresh recorded webhook, recreating");
                    self.app_kv.delete(&[WEBHOOK_KEY]).await?;
                }
            }
        }

        let webhook = match webhook {
            Some(webhook) => webhook,
            None => {
                let created = self
                    .create_webhook(&credentials, space_id)
                    .await
                    .map_err(SyncError::Webhook)?;
                self.app_kv.set(WEBHOOK_KEY, &created, None).await?;
                info!(webhook_id = %created.id, "Webhook created");
                created
            }
        };

        if policy_id.is_none() {
            let id = self
                .create_policy(&credentials, space_id, &webhook.id)
                .await
                .map_err(SyncError::Policy)?;
            self.app_kv.set(POLICY_KEY, &id, None).await?;
            info!(policy_id = %id, "Notification policy created");
        }

        Ok(())
    }

    /// Re-apply attributes to a recorded webhook. `Ok(false)` when it no
    /// longer exists.
    async fn refresh_webhook(
        &self,
        credentials: &Credentials,
        space_id: &str,
        webhook: &WebhookRegistration,
    ) -> Result<bool, ClientError> {
        let found: GetWebhookData = self
            .client
            .execute(credentials, GET_WEBHOOK_QUERY, json!({ "id": webhook.id }))
            .await?;

        if found.named_webhooks_integration.is_none() {
            return Ok(false);
        }

        self.update_webhook(credentials, space_id, &webhook.id, &webhook.secret)
            .await?;
        Ok(true)
    }

    async fn create_webhook(
        &self,
        credentials: &Credentials,
        space_id: &str,
    ) -> Result<WebhookRegistration, ClientError> {
        let secret = generate_secret();
        let unique_name = format!("flows-{}", uuid::Uuid::new_v4());

        let created: CreateWebhookData = self
            .client
            .execute(
                credentials,
                CREATE_WEBHOOK_MUTATION,
                json!({ "input": self.webhook_input(space_id, &unique_name, &secret) }),
            )
            .await?;
        let id = created.named_webhooks_integration_create.id;

        // Created under a unique name first, then renamed for display
        self.update_webhook(credentials, space_id, &id, &secret)
            .await?;

        Ok(WebhookRegistration { id, secret })
    }

    async fn update_webhook(
        &self,
        credentials: &Credentials,
        space_id: &str,
        id: &str,
        secret: &str,
    ) -> Result<(), ClientError> {
        let _: Value = self
            .client
            .execute(
                credentials,
                UPDATE_WEBHOOK_MUTATION,
                json!({
                    "id": id,
                    "input": self.webhook_input(space_id, &self.webhook_display_name(), secret),
                }),
            )
            .await?;
        Ok(())
    }

    async fn create_policy(
        &self,
        credentials: &Credentials,
        space_id: &str,
        webhook_id: &str,
    ) -> Result<String, ClientError> {
        let created: CreatePolicyData = self
            .client
            .execute(
                credentials,
                CREATE_POLICY_MUTATION,
                json!({
                    "input": {
                        "name": format!("Flows Notification Policy ({})", self.installation_url),
                        "body": notification_policy_body(webhook_id),
                        "type": "NOTIFICATION",
                        "space": space_id,
                        "labels": [WEBHOOK_LABEL],
                        "description": "Notification policy for routing Spacelift events to Flows webhook",
                    }
                }),
            )
            .await?;
        Ok(created.policy_create_v2.id)
    }

    fn webhook_display_name(&self) -> String {
        format!("Flows Webhook ({})", self.installation_url)
    }

    fn webhook_input(&self, space_id: &str, name: &str, secret: &str) -> Value {
        json!({
            "space": space_id,
            "name": name,
            "endpoint": self.webhook_url,
            "enabled": true,
            "labels": [WEBHOOK_LABEL],
            "secret": secret,
        })
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Rego source routing every notification to `webhook_id`.
///
/// The id is embedded as a JSON string literal, which Rego parses
/// identically.
pub fn notification_policy_body(webhook_id: &str) -> String {
    let literal = Value::String(webhook_id.to_string()).to_string();
    format!(
        r#"package spacelift

# Default notification policy that routes all notifications to Flows webhook
webhook[{{"endpoint_id": endpoint.id}}] {{
  endpoint := input.webhook_endpoints[_]
  endpoint.id == {literal}
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_body_embeds_escaped_id() {
        let body = notification_policy_body("01HWEBHOOK");
        assert!(body.starts_with("package spacelift\n"));
        assert!(body.contains(r#"webhook[{"endpoint_id": endpoint.id}] {"#));
        assert!(body.contains(r#"endpoint.id == "01HWEBHOOK""#));

        let hostile = notification_policy_body("x\"\n}");
        assert!(hostile.contains(r#"endpoint.id == "x\"\n}""#));
    }

    #[test]
    fn test_generated_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(AppStatus::Ready).unwrap(),
            json!({ "status": "ready" })
        );
        assert_eq!(
            serde_json::to_value(AppStatus::Failed("Setup failed".into())).unwrap(),
            json!({ "status": "failed", "description": "Setup failed" })
        );
    }
}
