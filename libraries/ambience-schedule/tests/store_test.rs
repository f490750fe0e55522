//! JSON execution store persistence

mod common;

use ambience_core::{ExecutionRecord, ScheduleId};
use ambience_schedule::{ExecutionStore, JsonExecutionStore, ScheduleError};
use chrono::Duration;
use common::at;

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("executions.json");
    let now = at(2025, 6, 2, 12, 0);

    let store = JsonExecutionStore::open_at(&path, Duration::days(7), now)
        .await
        .unwrap();
    assert!(store.records().await.unwrap().is_empty());
    store.record(ExecutionRecord::new("promo", at(2025, 6, 2, 10, 0))).await.unwrap();
    store.record(ExecutionRecord::new("jingle", at(2025, 6, 2, 11, 45))).await.unwrap();
    drop(store);

    // No temp file left behind
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("executions.json")]);

    let reopened = JsonExecutionStore::open_at(&path, Duration::days(7), now)
        .await
        .unwrap();
    assert_eq!(
        reopened.last_execution(&ScheduleId::new("promo")).await.unwrap(),
        Some(at(2025, 6, 2, 10, 0))
    );
    let ids: Vec<String> = reopened
        .records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.schedule_id.to_string())
        .collect();
    assert_eq!(ids, vec!["jingle", "promo"]);
}

#[tokio::test]
async fn expired_records_are_pruned_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("executions.json");
    let records = vec![
        ExecutionRecord::new("old", at(2025, 5, 1, 10, 0)),
        ExecutionRecord::new("recent", at(2025, 6, 1, 10, 0)),
    ];
    std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

    let store = JsonExecutionStore::open_at(&path, Duration::days(7), at(2025, 6, 2, 12, 0))
        .await
        .unwrap();
    assert_eq!(store.last_execution(&ScheduleId::new("old")).await.unwrap(), None);
    assert!(store
        .last_execution(&ScheduleId::new("recent"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn duplicate_entries_keep_the_latest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("executions.json");
    std::fs::write(
        &path,
        r#"[
            { "scheduleId": "promo", "lastFired": "2025-06-02T10:00:00" },
            { "scheduleId": "promo", "lastFired": "2025-06-02T09:00:00" }
        ]"#,
    )
    .unwrap();

    let store = JsonExecutionStore::open_at(&path, Duration::days(7), at(2025, 6, 2, 12, 0))
        .await
        .unwrap();
    assert_eq!(
        store.last_execution(&ScheduleId::new("promo")).await.unwrap(),
        Some(at(2025, 6, 2, 10, 0))
    );
}

#[tokio::test]
async fn empty_file_is_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("executions.json");
    std::fs::write(&path, "\n").unwrap();

    let store = JsonExecutionStore::open(&path, Duration::days(7)).await.unwrap();
    assert!(store.records().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("executions.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = JsonExecutionStore::open(&path, Duration::days(7)).await.unwrap_err();
    assert!(matches!(err, ScheduleError::Parse { .. }));
}
