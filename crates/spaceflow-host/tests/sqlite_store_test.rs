// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the SQLite host store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spaceflow_host::events::PendingState;
use spaceflow_host::sqlite::SqliteStore;
use spaceflow_host::{
    EventId, EventSink, HostError, KvNamespace, KvStore, NewPendingEvent, OutgoingEvent,
};

fn pending(description: &str) -> NewPendingEvent {
    NewPendingEvent {
        output_key: "completed".to_string(),
        payload: json!({"runId": "run-1"}),
        status_description: description.to_string(),
    }
}

#[tokio::test]
async fn test_kv_roundtrip_and_overwrite() {
    let store = SqliteStore::in_memory().await.unwrap();

    store.set("app/webhook", json!({"id": "w1"}), None).await.unwrap();
    store.set("app/webhook", json!({"id": "w2"}), None).await.unwrap();

    assert_eq!(
        store.get("app/webhook").await.unwrap(),
        Some(json!({"id": "w2"}))
    );
    assert_eq!(store.get("app/missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_kv_ttl_expiry_hides_entry() {
    let store = SqliteStore::in_memory().await.unwrap();

    store
        .set("app/spacelift_jwt_x_y", json!({"jwt": "t"}), Some(Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(store.get("app/spacelift_jwt_x_y").await.unwrap(), None);
    assert!(store.list("app/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_kv_list_matches_prefix_literally() {
    let store = SqliteStore::in_memory().await.unwrap();

    store.set("block/a/run:1", json!(1), None).await.unwrap();
    store.set("block/a/run:2", json!(2), None).await.unwrap();
    store.set("block/a/task:1", json!(3), None).await.unwrap();
    store.set("block/a_b/run:1", json!(4), None).await.unwrap();
    store.set("block/aXb/run:1", json!(5), None).await.unwrap();

    let entries = store.list("block/a/run:").await.unwrap();
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["block/a/run:1", "block/a/run:2"]);

    // `_` is not a wildcard.
    let entries = store.list("block/a_b/").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].value, json!(4));
}

#[tokio::test]
async fn test_namespace_delete_over_sqlite() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let ns = KvNamespace::block(store.clone(), "blk");

    ns.set("run:1", &json!({"x": 1}), None).await.unwrap();
    ns.delete(&["run:1", "run:never"]).await.unwrap();

    assert!(ns.get::<serde_json::Value>("run:1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_emit_completing_pending_is_atomic() {
    let store = SqliteStore::in_memory().await.unwrap();
    let handle = store
        .create_pending("blk", pending("Run run-1 started"))
        .await
        .unwrap();

    store
        .update_pending(&handle, "Run run-1 is planning")
        .await
        .unwrap();

    let parent = EventId("incoming-1".to_string());
    store
        .emit(
            "blk",
            OutgoingEvent::new("completed", json!({"state": "FINISHED"}))
                .with_parent(Some(parent.clone()))
                .completing(handle.clone()),
        )
        .await
        .unwrap();

    let again = store
        .emit(
            "blk",
            OutgoingEvent::new("completed", json!({"state": "FINISHED"}))
                .completing(handle.clone()),
        )
        .await;
    assert!(matches!(again, Err(HostError::PendingAlreadyResolved(_))));

    let events = store.list_events("blk").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].parent_event_id, Some(parent));
    assert_eq!(events[0].completes, Some(handle.clone()));

    let record = store.get_pending(&handle).await.unwrap().unwrap();
    assert_eq!(record.state, PendingState::Completed);
    assert_eq!(record.status_description, "Run run-1 is planning");
}

#[tokio::test]
async fn test_cancel_pending_records_reason_once() {
    let store = SqliteStore::in_memory().await.unwrap();
    let handle = store.create_pending("blk", pending("started")).await.unwrap();

    store.cancel_pending(&handle, "stale").await.unwrap();
    let second = store.cancel_pending(&handle, "stale again").await;
    assert!(matches!(second, Err(HostError::PendingAlreadyResolved(_))));

    let update = store.update_pending(&handle, "too late").await;
    assert!(matches!(update, Err(HostError::PendingAlreadyResolved(_))));

    let record = store.get_pending(&handle).await.unwrap().unwrap();
    assert_eq!(record.state, PendingState::Cancelled);
    assert_eq!(record.cancel_reason.as_deref(), Some("stale"));
}

#[tokio::test]
async fn test_unknown_pending_is_not_found() {
    let store = SqliteStore::in_memory().await.unwrap();
    let missing = spaceflow_host::PendingEventId("missing".to_string());

    assert!(matches!(
        store.cancel_pending(&missing, "x").await,
        Err(HostError::PendingNotFound(_))
    ));
    assert!(store.get_pending(&missing).await.unwrap().is_none());
}

#[tokio::test]
async fn test_from_path_creates_parent_dirs_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("spaceflow.db");

    {
        let store = SqliteStore::from_path(&path).await.unwrap();
        store.set("app/notificationPolicyId", json!("p-1"), None).await.unwrap();
        store.pool().close().await;
    }

    let reopened = SqliteStore::from_path(&path).await.unwrap();
    assert_eq!(
        reopened.get("app/notificationPolicyId").await.unwrap(),
        Some(json!("p-1"))
    );
}

#[tokio::test]
async fn test_prune_removes_resolved_and_old_records() {
    let store = SqliteStore::in_memory().await.unwrap();

    let open = store.create_pending("blk", pending("Run run-1 started")).await.unwrap();
    let done = store.create_pending("blk", pending("Run run-2 started")).await.unwrap();
    let stale = store.create_pending("blk", pending("Run run-3 started")).await.unwrap();

    store
        .emit(
            "blk",
            OutgoingEvent::new("completed", json!({"state": "FINISHED"})).completing(done.clone()),
        )
        .await
        .unwrap();
    store.cancel_pending(&stale, "stale").await.unwrap();

    let resolved = store.get_pending(&done).await.unwrap().unwrap();
    assert!(resolved.resolved_at.is_some());

    // Nothing is old enough yet.
    let cutoff_past = chrono::Utc::now() - chrono::Duration::hours(1);
    assert_eq!(store.prune(cutoff_past).await.unwrap(), 0);

    let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    assert_eq!(store.prune(cutoff).await.unwrap(), 3);

    assert!(store.get_pending(&done).await.unwrap().is_none());
    assert!(store.get_pending(&stale).await.unwrap().is_none());
    assert!(store.list_events("blk").await.unwrap().is_empty());

    let kept = store.get_pending(&open).await.unwrap().unwrap();
    assert_eq!(kept.state, PendingState::Pending);
    store.update_pending(&open, "Run run-1 is planning").await.unwrap();
}
