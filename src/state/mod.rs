//! Durable state storage with atomic writes.
//!
//! One JSON state file per backup target, named deterministically from the
//! target's absolute path and kept under a fixed state directory.
//!
//! # Atomic Writes
//!
//! Saves use the atomic write pattern:
//! 1. Write to temp file: `<name>.json.tmp`
//! 2. Rename to final path: `<name>.json`
//!
//! A crash mid-save leaves either the previous complete snapshot or the new
//! complete snapshot on disk, never a partial write.

pub mod model;

pub use model::{BackupState, DailyQuota, FailedUpload, QuotaReset, Session, UploadedFile};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::calendar;
use crate::error::{IoSnafu, SerializeSnafu, StateError};

const STATE_FILE_PREFIX: &str = "state_";
const STATE_FILE_SUFFIX: &str = ".json";

/// Shared handle to a state store. Execution is strictly sequential; the
/// mutex exists so the quota tracker, album manager, and uploader can hold
/// the same store without aliasing `&mut`.
pub type SharedState = Arc<Mutex<StateStore>>;

/// Derive the state filename for a target directory.
///
/// Path separators and characters illegal in filenames become hyphens,
/// runs of hyphens collapse, and the result is lower-cased, so
/// `/Users/photos/Vacation` maps to `state_users-photos-vacation.json`.
pub fn state_file_name(base_directory: &Path) -> String {
    let raw = base_directory.to_string_lossy();
    let mut sanitized = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = match ch {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '-',
            other => other.to_ascii_lowercase(),
        };
        if mapped == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(mapped);
    }
    let sanitized = sanitized.trim_matches('-');
    format!("{STATE_FILE_PREFIX}{sanitized}{STATE_FILE_SUFFIX}")
}

/// Durable record of per-target backup progress.
///
/// Owns the in-memory [`BackupState`] and its on-disk location. All reads and
/// writes of persisted progress go through this type; nothing else touches
/// the state file.
pub struct StateStore {
    path: PathBuf,
    state: BackupState,
}

impl StateStore {
    /// Load the state for a target directory, creating fresh state when the
    /// file is absent, unparsable, or fails validation.
    ///
    /// A corrupt or mismatched file is treated as absent, not fatal: the run
    /// proceeds with fresh state rather than guessing at the content.
    pub async fn load(state_dir: &Path, base_directory: &Path) -> Self {
        let path = state_dir.join(state_file_name(base_directory));

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<BackupState>(&contents) {
                Ok(loaded) if loaded.is_valid_for(base_directory) => {
                    info!(path = %path.display(), "Loaded existing state");
                    loaded
                }
                Ok(_) => BackupState::new(base_directory),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to parse state file, starting fresh"
                    );
                    BackupState::new(base_directory)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state file found, starting fresh");
                BackupState::new(base_directory)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read state file, starting fresh"
                );
                BackupState::new(base_directory)
            }
        };

        Self { path, state }
    }

    /// Wrap this store in a shared handle.
    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Persist the current snapshot.
    ///
    /// Never propagates failure: on IO error the temp file is removed, the
    /// previous on-disk snapshot is left untouched, and the error is logged.
    pub async fn save(&mut self) {
        if let Err(e) = self.try_save().await {
            warn!(path = %self.path.display(), error = %e, "Failed to save state");
        }
    }

    async fn try_save(&mut self) -> Result<(), StateError> {
        self.state.last_updated = calendar::now_utc();

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.context(IoSnafu)?;
        }

        let json = serde_json::to_string_pretty(&self.state).context(SerializeSnafu)?;
        let temp = self.path.with_extension("json.tmp");

        if let Err(e) = tokio::fs::write(&temp, &json).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e).context(IoSnafu);
        }
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e).context(IoSnafu);
        }

        debug!(path = %self.path.display(), "State saved");
        Ok(())
    }

    /// Delete the state file for a fresh start.
    pub async fn delete_file(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => info!(path = %self.path.display(), "Deleted state file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to delete state file"),
        }
    }

    /// Reset both quota counters under today's quota-reset date, preserving
    /// upload progress. When `daily_usage` is given, the daily counter is set
    /// to that value instead of zero (to mirror externally observed usage).
    pub fn reset_quota(&mut self, daily_usage: Option<u64>) {
        let now = calendar::now_utc();
        self.state.daily_quota.date = calendar::quota_date_of(now);
        self.state.daily_quota.total_requests = daily_usage.unwrap_or(0);
        self.state.daily_quota.reset_at = now;
        self.state.current_session.api_requests_count = 0;
    }

    /// Read access to the aggregate.
    pub fn state(&self) -> &BackupState {
        &self.state
    }

    /// Mutable access for tests that need to fabricate historical state.
    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut BackupState {
        &mut self.state
    }

    /// Location of the state file on disk.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    // Delegating mutators: the rest of the crate goes through these rather
    // than reaching into the aggregate.

    pub fn start_new_session(&mut self) {
        self.state.start_new_session();
        info!("Started new backup session");
    }

    pub fn roll_daily_quota(&mut self) -> Option<QuotaReset> {
        self.state.roll_daily_quota()
    }

    pub fn add_api_requests(&mut self, count: u64) {
        self.state.add_api_requests(count);
    }

    pub fn session_request_count(&self) -> u64 {
        self.state.current_session.api_requests_count
    }

    pub fn daily_request_count(&self) -> u64 {
        self.state.daily_quota.total_requests
    }

    pub fn is_file_uploaded(&self, path: &Path) -> bool {
        self.state.is_file_uploaded(path)
    }

    pub fn uploaded_count(&self) -> usize {
        self.state.uploaded_files.len()
    }

    pub fn mark_file_uploaded(
        &mut self,
        path: &Path,
        media_item_id: String,
        album_id: Option<String>,
    ) {
        self.state.mark_file_uploaded(path, media_item_id, album_id);
    }

    pub fn mark_file_failed(&mut self, path: &Path, error: &str) {
        self.state.mark_file_failed(path, error);
    }

    pub fn increment_files_processed(&mut self) {
        self.state.increment_files_processed();
    }

    pub fn add_created_album(&mut self, name: &str, album_id: &str) {
        self.state.add_created_album(name, album_id);
    }

    pub fn album_id(&self, name: &str) -> Option<String> {
        self.state.album_id(name).map(str::to_string)
    }

    pub fn set_last_processed_directory(&mut self, directory: &Path) {
        self.state.set_last_processed_directory(directory);
    }

    pub fn set_stop_reason(&mut self, reason: &str) {
        self.state.set_stop_reason(reason);
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.state.current_session.stop_reason.clone()
    }

    pub fn summary(&self) -> String {
        self.state.summary()
    }
}

/// Lightweight view of one persisted state file, for introspection.
#[derive(Debug)]
pub struct StateOverview {
    pub file_name: String,
    pub base_directory: Option<String>,
    pub uploaded: usize,
    pub failed: usize,
    pub last_updated: Option<String>,
}

/// List every persisted state file under the state directory, with a summary
/// of each. Files that fail to parse are still listed, without details.
pub async fn list_states(state_dir: &Path) -> Vec<StateOverview> {
    let mut overviews = Vec::new();

    let mut entries = match tokio::fs::read_dir(state_dir).await {
        Ok(entries) => entries,
        Err(_) => return overviews,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.starts_with(STATE_FILE_PREFIX) || !file_name.ends_with(STATE_FILE_SUFFIX) {
            continue;
        }

        let mut overview = StateOverview {
            file_name,
            base_directory: None,
            uploaded: 0,
            failed: 0,
            last_updated: None,
        };

        if let Ok(contents) = tokio::fs::read_to_string(entry.path()).await {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents) {
                overview.base_directory = value
                    .get("base_directory")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                overview.uploaded = value
                    .get("uploaded_files")
                    .and_then(|v| v.as_object())
                    .map_or(0, |m| m.len());
                overview.failed = value
                    .get("failed_uploads")
                    .and_then(|v| v.as_object())
                    .map_or(0, |m| m.len());
                overview.last_updated = value
                    .get("last_updated")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }
        }

        overviews.push(overview);
    }

    overviews.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    overviews
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_file_name_sanitization() {
        assert_eq!(
            state_file_name(Path::new("/Users/photos/Vacation")),
            "state_users-photos-vacation.json"
        );
        assert_eq!(
            state_file_name(Path::new("/a//weird:\"name?/dir")),
            "state_a-weird-name-dir.json"
        );
    }

    #[test]
    fn test_state_file_name_is_deterministic() {
        let a = state_file_name(Path::new("/home/alice/pics"));
        let b = state_file_name(Path::new("/home/alice/pics"));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_load_absent_creates_fresh() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::load(temp.path(), Path::new("/tmp/photos")).await;
        assert_eq!(store.uploaded_count(), 0);
        assert_eq!(store.state().base_directory, Path::new("/tmp/photos"));
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let base = Path::new("/tmp/photos");

        let mut store = StateStore::load(temp.path(), base).await;
        store.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
        store.add_created_album("trip", "album-1");
        store.save().await;

        let reloaded = StateStore::load(temp.path(), base).await;
        assert!(reloaded.is_file_uploaded(Path::new("/tmp/photos/a.jpg")));
        assert_eq!(reloaded.album_id("trip"), Some("album-1".to_string()));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let base = Path::new("/tmp/photos");
        let path = temp.path().join(state_file_name(base));
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let store = StateStore::load(temp.path(), base).await;
        assert_eq!(store.uploaded_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_base_directory_starts_fresh() {
        let temp = TempDir::new().unwrap();

        let mut store = StateStore::load(temp.path(), Path::new("/tmp/photos")).await;
        store.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
        store.save().await;

        // Force the other target onto the same file name to simulate a
        // mismatched snapshot.
        let other_path = temp.path().join(state_file_name(Path::new("/tmp/other")));
        tokio::fs::rename(store.file_path(), &other_path)
            .await
            .unwrap();

        let reloaded = StateStore::load(temp.path(), Path::new("/tmp/other")).await;
        assert_eq!(reloaded.uploaded_count(), 0);
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let base = Path::new("/tmp/photos");

        let mut store = StateStore::load(temp.path(), base).await;
        store.save().await;

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_reset_quota_preserves_progress() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::load(temp.path(), Path::new("/tmp/photos")).await;
        store.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
        store.add_api_requests(100);

        store.reset_quota(None);
        assert_eq!(store.daily_request_count(), 0);
        assert_eq!(store.session_request_count(), 0);
        assert_eq!(store.uploaded_count(), 1);

        store.add_api_requests(5);
        store.reset_quota(Some(1_234));
        assert_eq!(store.daily_request_count(), 1_234);
        assert_eq!(store.session_request_count(), 0);
    }

    #[tokio::test]
    async fn test_list_states() {
        let temp = TempDir::new().unwrap();
        let mut store = StateStore::load(temp.path(), Path::new("/tmp/photos")).await;
        store.mark_file_uploaded(Path::new("/tmp/photos/a.jpg"), "m1".into(), None);
        store.save().await;

        let overviews = list_states(temp.path()).await;
        assert_eq!(overviews.len(), 1);
        assert_eq!(overviews[0].uploaded, 1);
        assert_eq!(
            overviews[0].base_directory.as_deref(),
            Some("/tmp/photos")
        );
    }
}
