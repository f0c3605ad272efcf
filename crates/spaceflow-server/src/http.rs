// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | POST | `/webhook` | Signed Spacelift notifications |
//! | POST | `/blocks/{block_id}/events` | Deliver an input event to a block |
//! | GET | `/status` | Installation status after the last sync |
//! | GET | `/health` | Liveness |
//!
//! A webhook is acknowledged before it is processed: once the signature
//! checks out the payload is enqueued for the webhook worker, which
//! dispatches payloads in the order they were accepted.

use std::sync::Arc;

use axum::body::Bytes;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use spaceflow_blocks::BlockError;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::provisioner::{AppStatus, WEBHOOK_KEY, WebhookRegistration};
use crate::signature::{self, SIGNATURE_HEADER, SignatureError};
use crate::webhook_queue::WebhookSender;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Block dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Queue of verified webhook payloads.
    pub webhooks: WebhookSender,
    /// Result of the last installation sync.
    pub status: Arc<RwLock<AppStatus>>,
}

impl AppState {
    /// State with a `pending` status.
    pub fn new(dispatcher: Arc<Dispatcher>, webhooks: WebhookSender) -> Self {
        Self {
            dispatcher,
            webhooks,
            status: Arc::new(RwLock::new(AppStatus::Pending)),
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook).fallback(invalid_request))
        .route("/blocks/{block_id}/events", post(invoke_block))
        .route("/status", get(app_status))
        .route("/health", get(heartbeat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn receive_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if header.is_none() {
        return invalid_request().await;
    }

    let registration: Option<WebhookRegistration> =
        match state.dispatcher.app_kv().get(WEBHOOK_KEY).await {
            Ok(registration) => registration,
            Err(e) => {
                error!(error = %e, "Failed to read webhook registration");
                return signature_rejection(SignatureError::SecretUnavailable);
            }
        };

    if let Err(e) = signature::verify(
        &body,
        header,
        registration.as_ref().map(|r| r.secret.as_str()),
    ) {
        warn!(error = %e, "Rejected webhook delivery");
        return signature_rejection(e);
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Webhook body is not JSON");
            return invalid_request().await;
        }
    };

    if let Err(e) = state.webhooks.send(payload).await {
        error!(error = %e, "Failed to enqueue webhook payload");
        return internal_error();
    }

    (
        StatusCode::OK,
        Json(json!({ "message": "Webhook received" })),
    )
        .into_response()
}

async fn invoke_block(
    State(state): State<AppState>,
    Path(block_id): Path<String>,
    body: Bytes,
) -> Response {
    let inputs: Value = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(inputs) => inputs,
            Err(_) => return invalid_request().await,
        }
    };

    match state.dispatcher.invoke(&block_id, inputs).await {
        Ok(event_id) => {
            debug!(block_id = %block_id, event_id = %event_id, "Block invoked");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "eventId": event_id })),
            )
                .into_response()
        }
        Err(e) => {
            let status = invoke_error_status(&e);
            if status.is_server_error() {
                error!(block_id = %block_id, error = %e, "Block invocation failed");
            }
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

fn invoke_error_status(e: &Error) -> StatusCode {
    match e {
        Error::BlockNotFound(_) => StatusCode::NOT_FOUND,
        Error::Block(b) if b.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Block(BlockError::Payload(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Block(BlockError::Client(_)) | Error::Client(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn signature_rejection(e: SignatureError) -> Response {
    let message = match e {
        SignatureError::MissingSignature => "Invalid request",
        SignatureError::InvalidSignature => "Invalid webhook signature",
        SignatureError::SecretUnavailable => "Internal server error",
    };
    (e.status_code(), Json(json!({ "error": message }))).into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

async fn invalid_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid request" })),
    )
        .into_response()
}

async fn app_status(State(state): State<AppState>) -> Response {
    let status = state.status.read().await.clone();
    (StatusCode::OK, Json(status)).into_response()
}

async fn heartbeat() -> Response {
    (StatusCode::OK, "OK").into_response()
}
