// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client tests against a mock GraphQL server.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use spaceflow_client::{ClientError, Credentials, SpaceliftClient, TokenCache};
use spaceflow_host::memory::MemoryKvStore;
use spaceflow_host::{KvNamespace, KvStore};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STACK_QUERY: &str = "query GetStack($id: ID!) { stack(id: $id) { id name } }";

#[derive(Debug, Deserialize)]
struct StackData {
    stack: Option<Stack>,
}

#[derive(Debug, Deserialize)]
struct Stack {
    id: String,
    name: String,
}

fn credentials(server: &MockServer) -> Credentials {
    Credentials {
        api_key_id: "01HKEY".to_string(),
        api_key_secret: "s3cret".to_string(),
        endpoint: server.uri(),
    }
}

fn client() -> (SpaceliftClient, Arc<MemoryKvStore>) {
    let store = Arc::new(MemoryKvStore::new());
    let client = SpaceliftClient::new(KvNamespace::app(store.clone())).unwrap();
    (client, store)
}

async fn mount_token(server: &MockServer, jwt: &str, expected_calls: u64) {
    let valid_until = chrono::Utc::now().timestamp() + 3600;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("apiKeyUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "apiKeyUser": { "jwt": jwt, "validUntil": valid_until } }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_token_is_exchanged_once_and_reused() {
    let server = MockServer::start().await;
    mount_token(&server, "jwt-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("GetStack"))
        .and(header("authorization", "Bearer jwt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "stack": { "id": "infra", "name": "Infra" } }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let (client, store) = client();
    let creds = credentials(&server);

    for _ in 0..2 {
        let data: StackData = client
            .execute(&creds, STACK_QUERY, json!({ "id": "infra" }))
            .await
            .unwrap();
        let stack = data.stack.unwrap();
        assert_eq!(stack.id, "infra");
        assert_eq!(stack.name, "Infra");
    }

    let key = format!("app/spacelift_jwt_{}_01HKEY", server.uri());
    let cached = store.get(&key).await.unwrap().unwrap();
    assert_eq!(cached["jwt"], "jwt-1");
}

#[tokio::test]
async fn test_graphql_errors_are_joined() {
    let server = MockServer::start().await;
    mount_token(&server, "jwt-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("GetStack"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "message": "not found" }, { "message": "forbidden" }]
        })))
        .mount(&server)
        .await;

    let (client, _) = client();
    let err = client
        .execute::<StackData>(&credentials(&server), STACK_QUERY, json!({ "id": "x" }))
        .await
        .unwrap_err();

    match err {
        ClientError::GraphQl(messages) => assert_eq!(messages, "not found, forbidden"),
        other => panic!("expected GraphQl error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_errors_win_over_partial_data() {
    let server = MockServer::start().await;
    mount_token(&server, "jwt-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("GetStack"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "stack": { "id": "infra", "name": "Infra" } },
            "errors": [{ "message": "partial failure" }]
        })))
        .mount(&server)
        .await;

    let (client, _) = client();
    let err = client
        .execute::<StackData>(&credentials(&server), STACK_QUERY, json!({ "id": "x" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::GraphQl(_)));
}

#[tokio::test]
async fn test_missing_data_is_protocol_error() {
    let server = MockServer::start().await;
    mount_token(&server, "jwt-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("GetStack"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let (client, _) = client();
    let err = client
        .execute::<Value>(&credentials(&server), STACK_QUERY, json!({ "id": "x" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}

#[tokio::test]
async fn test_unexpected_shape_is_protocol_error() {
    let server = MockServer::start().await;
    mount_token(&server, "jwt-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("GetStack"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "stack": { "id": 7 } }
        })))
        .mount(&server)
        .await;

    let (client, _) = client();
    let err = client
        .execute::<StackData>(&credentials(&server), STACK_QUERY, json!({ "id": "x" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}

#[tokio::test]
async fn test_non_json_body_is_protocol_error() {
    let server = MockServer::start().await;
    mount_token(&server, "jwt-1", 1).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("GetStack"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let (client, _) = client();
    let err = client
        .execute::<Value>(&credentials(&server), STACK_QUERY, json!({ "id": "x" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}

#[tokio::test]
async fn test_rejected_api_key_is_authentication_error_and_not_cached() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("apiKeyUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "apiKeyUser": null },
            "errors": [{ "message": "unauthorized" }]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let (client, store) = client();
    let creds = credentials(&server);

    for _ in 0..2 {
        let err = client
            .execute::<Value>(&creds, STACK_QUERY, json!({ "id": "x" }))
            .await
            .unwrap_err();
        match err {
            ClientError::Authentication(messages) => assert_eq!(messages, "unauthorized"),
            other => panic!("expected Authentication error, got {other:?}"),
        }
    }

    assert!(store.is_empty());
}

#[tokio::test]
async fn test_token_response_without_jwt_is_protocol_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("apiKeyUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "apiKeyUser": { "validUntil": 1 } }
        })))
        .mount(&server)
        .await;

    let cache = TokenCache::new(
        reqwest::Client::new(),
        KvNamespace::app(Arc::new(MemoryKvStore::new())),
    );
    let err = cache.get_token(&credentials(&server)).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}
