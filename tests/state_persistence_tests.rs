//! Tests for atomic state persistence and recovery.
//!
//! The state file must survive interruption at any point: a reader only ever
//! observes the previous complete snapshot or the new complete snapshot,
//! never a partial write.

use std::path::Path;

use tempfile::TempDir;

use shoebox::state::{list_states, state_file_name, BackupState, StateStore};

mod common;
use common::write_file;

#[tokio::test]
async fn test_recovery_after_simulated_crash_mid_write() {
    let state_dir = TempDir::new().unwrap();
    let base = Path::new("/tmp/photos");

    // A completed save.
    let mut store = StateStore::load(state_dir.path(), base).await;
    store.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
    store.save().await;

    // Simulate a crash mid-write: a truncated temp file next to the real
    // snapshot, exactly what an interrupted write-then-rename leaves behind.
    let final_path = state_dir.path().join(state_file_name(base));
    let temp_path = final_path.with_extension("json.tmp");
    write_file(&temp_path, b"{\"base_directory\": \"/tmp/pho");

    // Recovery sees the previous complete snapshot, untouched.
    let recovered = StateStore::load(state_dir.path(), base).await;
    assert!(recovered.is_file_uploaded(Path::new("/tmp/photos/a.jpg")));

    // The stray temp file does not shadow the real state file.
    let contents = std::fs::read_to_string(&final_path).unwrap();
    let parsed: BackupState = serde_json::from_str(&contents).unwrap();
    assert_eq!(parsed.uploaded_files.len(), 1);
}

#[tokio::test]
async fn test_on_disk_file_is_always_parsable_between_saves() {
    let state_dir = TempDir::new().unwrap();
    let base = Path::new("/tmp/photos");
    let final_path = state_dir.path().join(state_file_name(base));

    let mut store = StateStore::load(state_dir.path(), base).await;
    for i in 0..20 {
        store.mark_file_uploaded(
            Path::new(&format!("/tmp/photos/{i}.jpg")),
            format!("m{i}"),
            None,
        );
        store.save().await;

        // After every save the on-disk document is complete and valid.
        let contents = std::fs::read_to_string(&final_path).unwrap();
        let parsed: BackupState = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.uploaded_files.len(), i + 1);
    }
}

#[tokio::test]
async fn test_corrupt_state_is_discarded_not_fatal() {
    let state_dir = TempDir::new().unwrap();
    let base = Path::new("/tmp/photos");
    let path = state_dir.path().join(state_file_name(base));

    write_file(&path, b"this is not json at all");

    let store = StateStore::load(state_dir.path(), base).await;
    assert_eq!(store.uploaded_count(), 0);
}

#[tokio::test]
async fn test_schema_version_mismatch_is_discarded() {
    let state_dir = TempDir::new().unwrap();
    let base = Path::new("/tmp/photos");
    let path = state_dir.path().join(state_file_name(base));

    // Write a valid snapshot, then bump its recorded schema version to one
    // this build does not understand.
    let mut store = StateStore::load(state_dir.path(), base).await;
    store.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
    store.save().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&contents).unwrap();
    value["state_version"] = serde_json::json!(999);
    write_file(&path, serde_json::to_string(&value).unwrap().as_bytes());

    let reloaded = StateStore::load(state_dir.path(), base).await;
    assert_eq!(reloaded.uploaded_count(), 0);
}

#[tokio::test]
async fn test_missing_required_field_is_discarded() {
    let state_dir = TempDir::new().unwrap();
    let base = Path::new("/tmp/photos");
    let path = state_dir.path().join(state_file_name(base));

    let mut store = StateStore::load(state_dir.path(), base).await;
    store.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
    store.save().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&contents).unwrap();
    value.as_object_mut().unwrap().remove("current_session");
    write_file(&path, serde_json::to_string(&value).unwrap().as_bytes());

    let reloaded = StateStore::load(state_dir.path(), base).await;
    assert_eq!(reloaded.uploaded_count(), 0);
}

#[tokio::test]
async fn test_daily_rollover_survives_reload() {
    let state_dir = TempDir::new().unwrap();
    let base = Path::new("/tmp/photos");
    let path = state_dir.path().join(state_file_name(base));

    let mut store = StateStore::load(state_dir.path(), base).await;
    store.add_api_requests(123);
    store.save().await;

    // Backdate the persisted quota window.
    let contents = std::fs::read_to_string(&path).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&contents).unwrap();
    value["daily_quota"]["date"] = serde_json::json!("2020-06-01");
    write_file(&path, serde_json::to_string(&value).unwrap().as_bytes());

    let mut reloaded = StateStore::load(state_dir.path(), base).await;
    let reset = reloaded.roll_daily_quota().expect("window should roll");
    assert_eq!(reset.previous_date, "2020-06-01");
    assert_eq!(reset.requests_at_reset, 123);
    assert_eq!(reloaded.daily_request_count(), 0);

    // The archived entry persists across a save/load cycle.
    reloaded.save().await;
    let again = StateStore::load(state_dir.path(), base).await;
    assert_eq!(again.state().daily_quota.resets.len(), 1);
    assert_eq!(again.state().daily_quota.resets[0].previous_date, "2020-06-01");
}

#[tokio::test]
async fn test_list_states_reports_each_target() {
    let state_dir = TempDir::new().unwrap();

    let mut first = StateStore::load(state_dir.path(), Path::new("/tmp/photos")).await;
    first.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
    first.save().await;

    let mut second = StateStore::load(state_dir.path(), Path::new("/tmp/other")).await;
    second.mark_file_failed(Path::new("/tmp/other/b.jpg"), "boom");
    second.save().await;

    let overviews = list_states(state_dir.path()).await;
    assert_eq!(overviews.len(), 2);

    let photos = overviews
        .iter()
        .find(|o| o.base_directory.as_deref() == Some("/tmp/photos"))
        .unwrap();
    assert_eq!(photos.uploaded, 1);
    assert_eq!(photos.failed, 0);

    let other = overviews
        .iter()
        .find(|o| o.base_directory.as_deref() == Some("/tmp/other"))
        .unwrap();
    assert_eq!(other.failed, 1);
}
