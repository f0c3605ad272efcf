// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use spaceflow_blocks::CorrelationRecord;
use spaceflow_client::{AppConfig, SpaceliftClient};
use spaceflow_host::memory::{MemoryEventSink, MemoryKvStore};
use spaceflow_host::KvNamespace;
use spaceflow_server::config::BlockSpec;
use spaceflow_server::dispatcher::Dispatcher;
use spaceflow_server::http::{AppState, router};
use spaceflow_server::provisioner::{WEBHOOK_KEY, WebhookRegistration};
use spaceflow_server::signature::sign;
use spaceflow_server::webhook_queue::{DEFAULT_CAPACITY, webhook_queue};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "0123456789abcdef";

struct Harness {
    app: Router,
    store: Arc<MemoryKvStore>,
    events: Arc<MemoryEventSink>,
}

async fn harness(endpoint: Option<String>, blocks: &[(&str, &str)], with_secret: bool) -> Harness {
    let store = Arc::new(MemoryKvStore::new());
    let events = Arc::new(MemoryEventSink::new());
    let app_kv = KvNamespace::app(store.clone());

    if with_secret {
        app_kv
            .set(
                WEBHOOK_KEY,
                &WebhookRegistration {
                    id: "wh-1".to_string(),
                    secret: SECRET.to_string(),
                },
                None,
            )
            .await
            .unwrap();
    }

    let specs: Vec<BlockSpec> = blocks
        .iter()
        .map(|(id, ty)| BlockSpec {
            id: id.to_string(),
            block_type: ty.to_string(),
            config: Value::Null,
        })
        .collect();

    let dispatcher = Arc::new(
        Dispatcher::new(
            AppConfig {
                api_key_id: Some("01HKEY".to_string()),
                api_key_secret: Some("s3cret".to_string()),
                endpoint,
                space_id: Some("root".to_string()),
            },
            store.clone(),
            events.clone(),
            SpaceliftClient::new(app_kv).unwrap(),
            &specs,
        )
        .unwrap(),
    );

    let (webhooks, worker) = webhook_queue(dispatcher.clone(), DEFAULT_CAPACITY);
    tokio::spawn(worker.run());

    Harness {
        app: router(AppState::new(dispatcher, webhooks)),
        store,
        events,
    }
}

fn signed_webhook(body: &Value) -> Request<Body> {
    let raw = serde_json::to_vec(body).unwrap();
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("X-Signature-256", sign(SECRET, &raw).unwrap())
        .body(Body::from(raw))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn test_valid_signature_acknowledged() {
    let h = harness(None, &[], true).await;

    let (status, body) = send(&h.app, signed_webhook(&json!({ "event": "ping" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Webhook received" }));
}

#[tokio::test]
async fn test_missing_signature_is_bad_request() {
    let h = harness(None, &[], true).await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid request" }));
}

#[tokio::test]
async fn test_non_post_is_bad_request() {
    let h = harness(None, &[], true).await;

    let request = Request::builder()
        .method("GET")
        .uri("/webhook")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid request" }));
}

#[tokio::test]
async fn test_tampered_body_is_unauthorized() {
    let h = harness(None, &[], true).await;

    let signature = sign(SECRET, br#"{"state":"FINISHED"}"#).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("X-Signature-256", signature)
        .body(Body::from(r#"{"state":"FAILED"}"#))
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Invalid webhook signature" }));
}

#[tokio::test]
async fn test_missing_secret_is_internal_error() {
    let h = harness(None, &[], false).await;

    let (status, body) = send(&h.app, signed_webhook(&json!({}))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal server error" }));
}

#[tokio::test]
async fn test_block_invocation_errors() {
    let h = harness(None, &[("runner", "triggerRun")], true).await;

    let request = Request::builder()
        .method("POST")
        .uri("/blocks/missing/events")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("POST")
        .uri("/blocks/runner/events")
        .body(Body::from(r#"{"commitSha":"abc"}"#))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("Stack ID (stackId)"));
}

#[tokio::test]
async fn test_health_and_status() {
    let h = harness(None, &[], true).await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");

    let request = Request::builder().uri("/status").body(Body::empty()).unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "pending" }));
}

#[tokio::test]
async fn test_run_followed_through_webhooks() {
    let server = MockServer::start().await;
    let valid_until = chrono::Utc::now().timestamp() + 3600;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("apiKeyUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "apiKeyUser": { "jwt": "jwt-1", "validUntil": valid_until } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("runTrigger"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "runTrigger": {
                    "id": "run-42",
                    "createdAt": 1700000000,
                    "updatedAt": 1700000000,
                    "state": "QUEUED",
                    "type": "TRACKED",
                    "commit": null
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(
        Some(server.uri()),
        &[("runner", "triggerRun"), ("lookup", "getStack")],
        true,
    )
    .await;
    let block_kv = KvNamespace::block(h.store.clone(), "runner");

    let request = Request::builder()
        .method("POST")
        .uri("/blocks/runner/events")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"stackId":"st-1"}"#))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["eventId"].is_string());

    let record: CorrelationRecord = block_kv.get("run:run-42").await.unwrap().unwrap();

    let (status, _) = send(
        &h.app,
        signed_webhook(&json!({ "run": { "id": "run-42" }, "state": "APPLYING" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = h.events.clone();
    wait_for(|| {
        let events = events.clone();
        async move { events.emitted_on("stateChanged").await.len() == 1 }
    })
    .await;
    assert!(block_kv.get::<Value>("run:run-42").await.unwrap().is_some());

    let (status, _) = send(
        &h.app,
        signed_webhook(&json!({ "run": { "id": "run-42" }, "state": "FINISHED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = h.events.clone();
    wait_for(|| {
        let events = events.clone();
        async move { events.emitted_on("completed").await.len() == 1 }
    })
    .await;

    let completed = h.events.emitted_on("completed").await;
    assert_eq!(completed[0].block_id, "runner");
    assert_eq!(completed[0].completes.as_ref(), Some(&record.pending_event_id));
    assert_eq!(h.events.emitted_on("stateChanged").await.len(), 1);

    let block_kv_check = block_kv.clone();
    wait_for(|| {
        let kv = block_kv_check.clone();
        async move { kv.get::<Value>("run:run-42").await.unwrap().is_none() }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_back_to_back_webhooks_keep_arrival_order() {
    const DELIVERIES: u64 = 200;

    let server = MockServer::start().await;
    let valid_until = chrono::Utc::now().timestamp() + 3600;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("apiKeyUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "apiKeyUser": { "jwt": "jwt-1", "validUntil": valid_until } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("runTrigger"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "runTrigger": {
                    "id": "run-7",
                    "createdAt": 1700000000,
                    "updatedAt": 1700000000,
                    "state": "QUEUED",
                    "type": "TRACKED",
                    "commit": null
                }
            }
        })))
        .mount(&server)
        .await;

    let h = harness(Some(server.uri()), &[("runner", "triggerRun")], true).await;

    let request = Request::builder()
        .method("POST")
        .uri("/blocks/runner/events")
        .body(Body::from(r#"{"stackId":"st-1"}"#))
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    for version in 0..DELIVERIES {
        let state = if version % 2 == 0 { "PLANNING" } else { "APPLYING" };
        let (status, _) = send(
            &h.app,
            signed_webhook(&json!({
                "run": { "id": "run-7" },
                "state": state,
                "stateVersion": version
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let events = h.events.clone();
    wait_for(|| {
        let events = events.clone();
        async move { events.emitted_on("stateChanged").await.len() as u64 == DELIVERIES }
    })
    .await;

    let versions: Vec<u64> = h
        .events
        .emitted_on("stateChanged")
        .await
        .iter()
        .map(|e| e.payload["stateVersion"].as_u64().unwrap())
        .collect();
    let expected: Vec<u64> = (0..DELIVERIES).collect();
    assert_eq!(versions, expected);
}
