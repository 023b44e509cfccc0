mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wcpos_storage::SyncRecordStore;
use wcpos_sync::{
    CancellationToken, CollectionReplicationState, HttpResponse, SyncConfig, SyncError,
    SyncOptions, SyncPage,
};
use wcpos_types::{SyncRecord, SyncStatus};

fn replication(
    fx: &Fixture,
    endpoint: &str,
    http: &Arc<ScriptedHttp>,
) -> Arc<CollectionReplicationState> {
    CollectionReplicationState::new(
        Arc::clone(&fx.collection),
        endpoint,
        http.clone(),
        SyncConfig::default(),
        &CancellationToken::new(),
    )
}

// ── Initial state ────────────────────────────────────────────────

#[tokio::test]
async fn starts_paused_and_idle() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![]));
    let state = replication(&fx, "products", &http);

    assert!(state.is_paused());
    assert!(!state.is_active());
    assert!(!state.has_first_synced());
    assert_eq!(*state.subscribe_paused().borrow(), true);
}

#[tokio::test]
async fn sync_is_noop_while_paused() {
    let fx = fixture("products");
    fx.records
        .upsert(vec![SyncRecord::new(rid(1), "products", SyncStatus::PullNew)])
        .await
        .unwrap();
    let http = ScriptedHttp::serving(FakeServer::new(vec![product(1, OLD)]));
    let state = replication(&fx, "products", &http);

    let page = state.sync(SyncOptions::default()).await.unwrap();

    assert_eq!(page, SyncPage::default());
    assert!(http.requests().is_empty());
}

#[tokio::test]
async fn forced_sync_runs_while_paused() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![product(1, OLD), product(2, OLD)]));
    let state = replication(&fx, "products", &http);

    let page = state.sync(SyncOptions::forced(rids(&[2]))).await.unwrap();

    assert_eq!(page, SyncPage { fetched: 1, written: 1 });
    assert_eq!(http.bulk_requests()[0].body, Some(json!({ "include": [2] })));
    assert_eq!(stored_ids(&fx.docs), vec![2]);
}

// ── Audit cycle ──────────────────────────────────────────────────

#[tokio::test]
async fn forced_run_audits_and_pulls_everything() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![
        product(1, OLD),
        product(2, OLD),
        product(3, OLD),
    ]));
    let state = replication(&fx, "products", &http);

    state.run(true).await.unwrap();

    assert!(!state.is_paused());
    assert!(state.has_first_synced());
    assert_eq!(stored_ids(&fx.docs), vec![1, 2, 3]);
    assert_eq!(
        statuses(&fx.records, "products"),
        vec![
            (1, SyncStatus::Synced),
            (2, SyncStatus::Synced),
            (3, SyncStatus::Synced),
        ]
    );

    let audit = &http.snapshot_requests()[0];
    assert_eq!(audit.query_values("fields[]"), vec!["id", "date_modified_gmt"]);
    assert_eq!(audit.query_values("posts_per_page"), vec!["-1"]);

    let bulk = &http.bulk_requests()[0];
    assert_eq!(bulk.body, Some(json!({ "exclude": [] })));
    assert_eq!(bulk.query_values("status"), vec!["publish"]);
    assert!(bulk
        .headers
        .contains(&("X-HTTP-Method-Override".to_string(), "GET".to_string())));
}

#[tokio::test]
async fn uses_exclusion_when_fewer_ids_are_synced() {
    let fx = fixture("customers");
    fx.docs.seed([local(Some(1), OLD)]);
    let http = ScriptedHttp::serving(FakeServer::new(
        (1..=5).map(|id| product(id, OLD)).collect(),
    ));
    let state = replication(&fx, "customers", &http);

    state.run(true).await.unwrap();

    let bulk = &http.bulk_requests()[0];
    assert_eq!(bulk.body, Some(json!({ "exclude": [1] })));
    assert!(bulk.query_values("status").is_empty());
    assert_eq!(stored_ids(&fx.docs), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn uses_inclusion_when_fewer_ids_are_missing() {
    let fx = fixture("customers");
    fx.docs.seed((1..=4).map(|id| local(Some(id), OLD)));
    let http = ScriptedHttp::serving(FakeServer::new(
        (1..=5).map(|id| product(id, OLD)).collect(),
    ));
    let state = replication(&fx, "customers", &http);

    state.run(true).await.unwrap();

    assert_eq!(http.bulk_requests()[0].body, Some(json!({ "include": [5] })));
}

#[tokio::test]
async fn refetches_records_updated_on_the_server() {
    let fx = fixture("products");
    fx.docs.seed([local(Some(1), OLD), local(Some(2), OLD)]);
    let http = ScriptedHttp::serving(FakeServer::new(vec![product(1, OLD), product(2, NEW)]));
    let state = replication(&fx, "products", &http);

    state.run(true).await.unwrap();

    assert_eq!(http.bulk_requests()[0].body, Some(json!({ "include": [2] })));
    let updated = fx
        .docs
        .snapshot()
        .into_iter()
        .find(|d| d.id == Some(rid(2)))
        .unwrap();
    assert_eq!(updated.date_modified_gmt, Some(ts(NEW)));
    assert_eq!(
        statuses(&fx.records, "products"),
        vec![(1, SyncStatus::Synced), (2, SyncStatus::Synced)]
    );
}

#[tokio::test]
async fn removes_records_deleted_on_the_server() {
    let fx = fixture("products");
    fx.docs.seed([local(Some(1), OLD), local(Some(2), OLD)]);
    let http = ScriptedHttp::serving(FakeServer::new(vec![product(1, OLD)]));
    let state = replication(&fx, "products", &http);

    state.run(true).await.unwrap();

    assert_eq!(stored_ids(&fx.docs), vec![1]);
    assert_eq!(statuses(&fx.records, "products"), vec![(1, SyncStatus::Synced)]);
    assert!(http.bulk_requests().is_empty());
}

#[tokio::test]
async fn malformed_audit_leaves_state_untouched() {
    let fx = fixture("products");
    fx.docs.seed([local(Some(1), OLD)]);
    let http = ScriptedHttp::new(|_| Ok(HttpResponse::ok(json!({ "code": "oops" }))));
    let state = replication(&fx, "products", &http);

    let err = state.run(true).await.unwrap_err();

    assert!(matches!(err, SyncError::MalformedResponse(_)));
    assert!(state.has_first_synced());
    assert!(!state.is_active());
    assert_eq!(stored_ids(&fx.docs), vec![1]);
    assert!(fx.records.snapshot().is_empty());
}

#[tokio::test]
async fn failed_audit_is_retried_on_next_run() {
    let fx = fixture("products");
    let server = FakeServer::new(vec![product(1, OLD)]);
    let failing = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let http = {
        let failing = Arc::clone(&failing);
        let server = Arc::clone(&server);
        ScriptedHttp::new(move |request| {
            if failing.load(std::sync::atomic::Ordering::SeqCst) {
                Err(SyncError::Server {
                    status: 503,
                    code: None,
                    message: None,
                })
            } else {
                server.handle(request)
            }
        })
    };
    let state = replication(&fx, "products", &http);

    assert!(state.run(false).await.is_err());
    failing.store(false, std::sync::atomic::Ordering::SeqCst);
    state.run(true).await.unwrap();

    assert_eq!(stored_ids(&fx.docs), vec![1]);
}

// ── Greedy paging ────────────────────────────────────────────────

#[tokio::test]
async fn greedy_sync_drains_all_pages() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::paged(
        (1..=5).map(|id| product(id, OLD)).collect(),
        Some(2),
    ));
    let state = replication(&fx, "products", &http);

    state.run(true).await.unwrap();
    assert_eq!(fx.docs.len(), 2);

    let page = state
        .sync(SyncOptions {
            greedy: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(page, SyncPage { fetched: 3, written: 3 });
    assert_eq!(stored_ids(&fx.docs), vec![1, 2, 3, 4, 5]);
}

// ── Incremental cycle ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn incremental_poll_after_interval() {
    const FUTURE: &str = "2099-01-01T00:00:00";
    let fx = fixture("products");
    let server = FakeServer::new(vec![product(1, OLD), product(2, OLD)]);
    let http = ScriptedHttp::serving(Arc::clone(&server));
    let state = replication(&fx, "products", &http);

    state.run(true).await.unwrap();
    state.run(false).await.unwrap();
    assert_eq!(http.snapshot_requests().len(), 1, "nothing due yet");

    server.upsert(product(2, FUTURE));
    server.upsert(product(3, FUTURE));
    tokio::time::advance(Duration::from_secs(301)).await;
    state.run(false).await.unwrap();

    let snapshots = http.snapshot_requests();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].query_values("modified_after").len(), 1);
    assert_eq!(
        statuses(&fx.records, "products"),
        vec![
            (1, SyncStatus::Synced),
            (2, SyncStatus::Synced),
            (3, SyncStatus::PullNew),
        ]
    );
    let refreshed = fx
        .docs
        .snapshot()
        .into_iter()
        .find(|d| d.id == Some(rid(2)))
        .unwrap();
    assert_eq!(refreshed.date_modified_gmt, Some(ts(FUTURE)));
}

#[tokio::test(start_paused = true)]
async fn full_audit_repeats_after_an_hour() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![product(1, OLD)]));
    let state = replication(&fx, "products", &http);

    state.run(true).await.unwrap();
    tokio::time::advance(Duration::from_secs(3601)).await;
    state.run(false).await.unwrap();

    let snapshots = http.snapshot_requests();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[1].query_values("modified_after").is_empty());
}

#[tokio::test]
async fn first_run_is_always_an_audit() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![]));
    let state = replication(&fx, "products", &http);

    state.run(false).await.unwrap();

    let snapshots = http.snapshot_requests();
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].query_values("modified_after").is_empty());
}

// ── Poller ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poller_runs_while_started_and_stops_when_paused() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![product(1, OLD)]));
    let state = replication(&fx, "products", &http);

    state.start();
    state.first_sync().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(stored_ids(&fx.docs), vec![1]);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(http.snapshot_requests().len(), 2);

    state.pause();
    tokio::time::sleep(Duration::from_secs(1200)).await;
    assert_eq!(http.snapshot_requests().len(), 2);

    state.cancel();
}

// ── Pause holds ──────────────────────────────────────────────────

#[tokio::test]
async fn holds_keep_replication_paused_until_released() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![]));
    let state = replication(&fx, "products", &http);
    state.run(true).await.unwrap();
    assert!(!state.is_paused());

    let first = state.hold();
    let second = state.hold();
    assert!(state.is_paused());
    drop(first);
    assert!(state.is_paused());
    drop(second);
    assert!(!state.is_paused());

    state.pause();
    drop(state.hold());
    assert!(state.is_paused());
}

// ── Cancellation ─────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_state_does_nothing() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![product(1, OLD)]));
    let state = replication(&fx, "products", &http);

    state.cancel();
    state.cancel();

    assert!(state.is_cancelled());
    state.run(true).await.unwrap();
    assert!(http.requests().is_empty());
    assert!(matches!(state.first_sync().await, Err(SyncError::Closed)));
}

#[tokio::test]
async fn parent_token_cancels_state() {
    let fx = fixture("products");
    let http = ScriptedHttp::serving(FakeServer::new(vec![]));
    let parent = CancellationToken::new();
    let state = CollectionReplicationState::new(
        Arc::clone(&fx.collection),
        "products",
        http.clone(),
        SyncConfig::default(),
        &parent,
    );

    parent.cancel();
    assert!(state.is_cancelled());
}

// ── Remote mutations ─────────────────────────────────────────────

#[tokio::test]
async fn remote_patch_routes_variations_through_parent() {
    let fx = fixture("variations");
    let http = ScriptedHttp::serving(FakeServer::new(vec![json!({
        "id": 34,
        "parent_id": 12,
        "stock_quantity": 1,
        "date_modified_gmt": OLD,
    })]));
    let state = replication(&fx, "products/variations", &http);
    state.run(true).await.unwrap();
    let original = fx.docs.snapshot().remove(0);

    let patched = state
        .remote_patch(&original, json!({ "stock_quantity": 3 }))
        .await
        .unwrap();

    let patch = http
        .requests()
        .into_iter()
        .find(|r| r.method == reqwest::Method::PATCH)
        .unwrap();
    assert_eq!(patch.path, "products/12/variations/34");
    assert_eq!(patched.local_id, original.local_id);
    let stored = fx.docs.snapshot();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].data["stock_quantity"], 3);
    assert_eq!(stored[0].date_modified_gmt, Some(ts(NEW)));
}

#[tokio::test]
async fn remote_create_replaces_offline_document() {
    let fx = fixture("orders");
    let offline = local(None, OLD).with_local_id("tmp-1");
    fx.docs.seed([offline.clone()]);
    let http = ScriptedHttp::serving(FakeServer::new(vec![]));
    let state = replication(&fx, "orders", &http);

    let created = state.remote_create(&offline).await.unwrap();

    assert_eq!(created.local_id.as_deref(), Some("tmp-1"));
    let stored = fx.docs.snapshot();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].local_id.as_deref(), Some("tmp-1"));
    assert_eq!(stored[0].id, created.id);
    assert_eq!(
        statuses(&fx.records, "orders"),
        vec![(created.id.unwrap().get(), SyncStatus::Synced)]
    );
}
