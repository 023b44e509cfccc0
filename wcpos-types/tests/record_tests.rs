use proptest::prelude::*;
use serde_json::json;
use wcpos_types::{
    GmtTimestamp, LocalDocument, RemoteId, ServerSnapshotRecord, SyncRecord, SyncStatus,
};

fn ts(s: &str) -> Option<GmtTimestamp> {
    Some(GmtTimestamp::parse(s).unwrap())
}

// ── SyncStatus ───────────────────────────────────────────────────

#[test]
fn status_wire_names_are_stable() {
    let names: Vec<&str> = SyncStatus::ALL.iter().map(|s| s.as_str()).collect();
    assert_eq!(
        names,
        vec!["SYNCED", "PULL_NEW", "PULL_UPDATE", "PUSH_UPDATE", "PULL_DELETE"]
    );
}

#[test]
fn status_serde_matches_as_str() {
    for status in SyncStatus::ALL {
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, format!("\"{}\"", status.as_str()));
        let parsed: SyncStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }
}

#[test]
fn status_parse_is_case_sensitive() {
    assert_eq!("PULL_NEW".parse::<SyncStatus>().unwrap(), SyncStatus::PullNew);
    assert!("pull_new".parse::<SyncStatus>().is_err());
}

#[test]
fn status_from_timestamps() {
    let older = ts("2024-01-01T00:00:00");
    let newer = ts("2024-01-02T00:00:00");
    assert_eq!(SyncStatus::from_timestamps(older, newer), SyncStatus::PullUpdate);
    assert_eq!(SyncStatus::from_timestamps(newer, older), SyncStatus::PushUpdate);
    assert_eq!(SyncStatus::from_timestamps(newer, newer), SyncStatus::Synced);
}

#[test]
fn status_missing_local_timestamp_pulls() {
    assert_eq!(
        SyncStatus::from_timestamps(None, ts("2024-01-01T00:00:00")),
        SyncStatus::PullUpdate
    );
    assert_eq!(SyncStatus::from_timestamps(None, None), SyncStatus::Synced);
}

proptest! {
    #[test]
    fn status_comparison_is_antisymmetric(a in 0i64..2_000_000_000, b in 0i64..2_000_000_000) {
        let ta = chrono::DateTime::from_timestamp(a, 0).map(GmtTimestamp::from_datetime);
        let tb = chrono::DateTime::from_timestamp(b, 0).map(GmtTimestamp::from_datetime);
        let forward = SyncStatus::from_timestamps(ta, tb);
        let backward = SyncStatus::from_timestamps(tb, ta);
        match forward {
            SyncStatus::PullUpdate => prop_assert_eq!(backward, SyncStatus::PushUpdate),
            SyncStatus::PushUpdate => prop_assert_eq!(backward, SyncStatus::PullUpdate),
            SyncStatus::Synced => prop_assert_eq!(backward, SyncStatus::Synced),
            _ => prop_assert!(false, "unexpected status {:?}", forward),
        }
    }
}

// ── SyncRecord / ServerSnapshotRecord ────────────────────────────

#[test]
fn sync_record_serializes_status_string() {
    let record = SyncRecord::new(RemoteId::new(5), "products", SyncStatus::PullDelete);
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value, json!({"id": 5, "endpoint": "products", "status": "PULL_DELETE"}));
}

#[test]
fn snapshot_record_parses_server_rows() {
    let rows: Vec<ServerSnapshotRecord> = serde_json::from_value(json!([
        {"id": 1, "date_modified_gmt": "2024-01-01T00:00:00"},
        {"id": 2, "date_modified_gmt": null},
        {"id": 3, "date_modified_gmt": ""},
        {"id": 4}
    ]))
    .unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].date_modified_gmt, ts("2024-01-01T00:00:00"));
    assert!(rows[1..].iter().all(|r| r.date_modified_gmt.is_none()));
}

#[test]
fn snapshot_record_rejects_bad_timestamp() {
    let result: Result<ServerSnapshotRecord, _> =
        serde_json::from_value(json!({"id": 1, "date_modified_gmt": "soon"}));
    assert!(result.is_err());
}

// ── LocalDocument ────────────────────────────────────────────────

#[test]
fn document_from_rest_reads_identity() {
    let doc = LocalDocument::from_rest(json!({
        "id": 10,
        "name": "Hoodie",
        "date_modified_gmt": "2024-01-01T00:00:00",
        "parent_id": "4"
    }));
    assert_eq!(doc.id, Some(RemoteId::new(10)));
    assert_eq!(doc.date_modified_gmt, ts("2024-01-01T00:00:00"));
    assert_eq!(doc.int_field("parent_id"), Some(4));
    assert!(doc.local_id.is_none());
    assert!(doc.is_remote());
}

#[test]
fn document_without_id_is_local_only() {
    let doc = LocalDocument::from_rest(json!({"name": "Draft order"})).with_local_id("abc");
    assert!(!doc.is_remote());
    assert_eq!(doc.local_id.as_deref(), Some("abc"));
}
