//! Persisted backup state for a single target directory.
//!
//! One `BackupState` exists per distinct base directory. It is the single
//! source of truth for upload progress, quota usage, and created albums;
//! every other component reads and writes it through [`crate::state::StateStore`].
//!
//! # State File Shape
//!
//! ```json
//! {
//!   "base_directory": "/home/alice/photos",
//!   "state_version": 1,
//!   "created_at": "2026-08-01T17:04:11Z",
//!   "last_updated": "2026-08-02T03:12:40Z",
//!   "current_session": { "...": "..." },
//!   "daily_quota": { "date": "2026-08-01", "total_requests": 412, "...": "..." },
//!   "uploaded_files": { "/home/alice/photos/2023/trip/a.jpg": { "...": "..." } },
//!   "failed_uploads": {},
//!   "created_albums": { "2023-trip": "album-id" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calendar;
use crate::config::STATE_VERSION;

/// Counters for one execution of the tool. Overwritten (never appended) when
/// a new session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// When this session started.
    pub start_time: DateTime<Utc>,
    /// Requests recorded during this session.
    pub api_requests_count: u64,
    /// Directory most recently entered by the orchestrator.
    pub last_processed_directory: Option<String>,
    /// Why the previous run stopped, if it recorded a reason.
    pub stop_reason: Option<String>,
    pub files_processed: u64,
    pub files_uploaded: u64,
    pub files_failed: u64,
}

impl Session {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            api_requests_count: 0,
            last_processed_directory: None,
            stop_reason: None,
            files_processed: 0,
            files_uploaded: 0,
            files_failed: 0,
        }
    }
}

/// One archived daily-quota rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaReset {
    /// Date the counter was accumulating under before the rollover.
    pub previous_date: String,
    /// Date the counter restarted under.
    pub new_date: String,
    /// Requests accumulated when the rollover happened.
    pub requests_at_reset: u64,
    /// Rollover instant in UTC.
    pub reset_at_utc: DateTime<Utc>,
    /// Rollover instant rendered in the quota-reset timezone.
    pub reset_at_local: String,
}

/// Request counter scoped to one calendar date in the quota-reset timezone.
///
/// The `date` field always reflects the quota-reset timezone, never UTC and
/// never the host's local zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyQuota {
    pub date: String,
    pub total_requests: u64,
    /// When this window was (re)initialized.
    pub reset_at: DateTime<Utc>,
    /// IANA name of the timezone the date is keyed to.
    pub timezone: String,
    /// Ordered history of past rollovers.
    #[serde(default)]
    pub resets: Vec<QuotaReset>,
}

impl DailyQuota {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            date: calendar::quota_date_of(now),
            total_requests: 0,
            reset_at: now,
            timezone: calendar::QUOTA_RESET_TZ.name().to_string(),
            resets: Vec::new(),
        }
    }
}

/// A successfully uploaded file. Created once per path and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub uploaded_at: DateTime<Utc>,
    pub media_item_id: String,
    pub album_id: Option<String>,
}

/// A file whose upload failed. Updated in place on repeated failure and
/// deleted when the same path later succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUpload {
    pub error: String,
    pub attempts: u64,
    pub first_attempt: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
}

/// Aggregate state for one backup target.
///
/// Every field is required on load; a file missing any of them (or recording
/// a different schema version or base directory) is discarded and replaced
/// with a fresh instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupState {
    /// Absolute path of the directory tree this state tracks.
    pub base_directory: PathBuf,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub current_session: Session,
    pub daily_quota: DailyQuota,
    pub uploaded_files: BTreeMap<String, UploadedFile>,
    pub failed_uploads: BTreeMap<String, FailedUpload>,
    pub created_albums: BTreeMap<String, String>,
}

impl BackupState {
    /// Create fresh state for a base directory.
    pub fn new(base_directory: &Path) -> Self {
        let now = calendar::now_utc();
        Self {
            base_directory: base_directory.to_path_buf(),
            state_version: STATE_VERSION,
            created_at: now,
            last_updated: now,
            current_session: Session::fresh(now),
            daily_quota: DailyQuota::fresh(now),
            uploaded_files: BTreeMap::new(),
            failed_uploads: BTreeMap::new(),
            created_albums: BTreeMap::new(),
        }
    }

    /// Validate a loaded snapshot against the expected schema version and
    /// base directory. Returns `false` if the snapshot must be discarded.
    pub fn is_valid_for(&self, base_directory: &Path) -> bool {
        if self.state_version != STATE_VERSION {
            warn!(
                found = self.state_version,
                expected = STATE_VERSION,
                "State file schema version mismatch, discarding"
            );
            return false;
        }
        if self.base_directory != base_directory {
            warn!(
                recorded = %self.base_directory.display(),
                requested = %base_directory.display(),
                "State file base directory mismatch, discarding"
            );
            return false;
        }
        true
    }

    /// Reset session counters for a new run and roll the daily window if the
    /// quota-reset date has changed.
    pub fn start_new_session(&mut self) {
        self.current_session = Session::fresh(calendar::now_utc());
        self.roll_daily_quota();
    }

    /// Archive and reset the daily counter if the quota-reset date moved on.
    ///
    /// Returns the archived rollover entry when a reset happened. Runs before
    /// every quota decision so usage never accrues silently past a
    /// quota-timezone midnight.
    pub fn roll_daily_quota(&mut self) -> Option<QuotaReset> {
        let current = calendar::quota_date_rolled(&self.daily_quota.date)?;
        let now = calendar::now_utc();
        let reset = QuotaReset {
            previous_date: std::mem::replace(&mut self.daily_quota.date, current.clone()),
            new_date: current,
            requests_at_reset: self.daily_quota.total_requests,
            reset_at_utc: now,
            reset_at_local: calendar::quota_time_of(now),
        };
        info!(
            previous_date = %reset.previous_date,
            new_date = %reset.new_date,
            requests = reset.requests_at_reset,
            "Daily quota window rolled over"
        );
        self.daily_quota.total_requests = 0;
        self.daily_quota.reset_at = now;
        self.daily_quota.resets.push(reset.clone());
        Some(reset)
    }

    /// Add to both the session and the daily request counters.
    pub fn add_api_requests(&mut self, count: u64) {
        self.current_session.api_requests_count += count;
        self.daily_quota.total_requests += count;
    }

    /// Record a successful upload, clearing any prior failure for the path.
    ///
    /// Success and failure are mutually exclusive terminal states per path;
    /// success wins.
    pub fn mark_file_uploaded(
        &mut self,
        path: &Path,
        media_item_id: String,
        album_id: Option<String>,
    ) {
        let key = path.to_string_lossy().into_owned();
        self.uploaded_files.insert(
            key.clone(),
            UploadedFile {
                uploaded_at: calendar::now_utc(),
                media_item_id,
                album_id,
            },
        );
        self.current_session.files_uploaded += 1;
        self.failed_uploads.remove(&key);
    }

    /// Record (or update) a failed upload. Attempt counts accumulate across
    /// runs; the first-attempt timestamp is preserved.
    pub fn mark_file_failed(&mut self, path: &Path, error: &str) {
        let key = path.to_string_lossy().into_owned();
        let now = calendar::now_utc();
        self.failed_uploads
            .entry(key)
            .and_modify(|failed| {
                failed.attempts += 1;
                failed.last_attempt = now;
                failed.error = error.to_string();
            })
            .or_insert_with(|| FailedUpload {
                error: error.to_string(),
                attempts: 1,
                first_attempt: now,
                last_attempt: now,
            });
        self.current_session.files_failed += 1;
    }

    /// Whether a path was already uploaded by a previous (or this) run.
    pub fn is_file_uploaded(&self, path: &Path) -> bool {
        self.uploaded_files
            .contains_key(path.to_string_lossy().as_ref())
    }

    /// Record an album created (or adopted) by this tool.
    pub fn add_created_album(&mut self, name: &str, album_id: &str) {
        self.created_albums
            .insert(name.to_string(), album_id.to_string());
    }

    /// Album id previously recorded for a sanitized name.
    pub fn album_id(&self, name: &str) -> Option<&str> {
        self.created_albums.get(name).map(String::as_str)
    }

    pub fn set_last_processed_directory(&mut self, directory: &Path) {
        self.current_session.last_processed_directory =
            Some(directory.to_string_lossy().into_owned());
    }

    pub fn set_stop_reason(&mut self, reason: &str) {
        info!("Backup stopped: {reason}");
        self.current_session.stop_reason = Some(reason.to_string());
    }

    pub fn increment_files_processed(&mut self) {
        self.current_session.files_processed += 1;
    }

    /// Human-readable summary of progress and counters.
    pub fn summary(&self) -> String {
        let session = &self.current_session;
        let mut lines = vec![
            format!("Base directory: {}", self.base_directory.display()),
            format!("Session started: {}", session.start_time),
            format!("Files processed: {}", session.files_processed),
            format!("Files uploaded: {}", session.files_uploaded),
            format!("Files failed: {}", session.files_failed),
            format!("API requests (session): {}", session.api_requests_count),
            format!("API requests (daily): {}", self.daily_quota.total_requests),
            format!("Albums created: {}", self.created_albums.len()),
        ];
        if let Some(last) = &session.last_processed_directory {
            lines.push(format!("Last processed: {last}"));
        }
        if let Some(reason) = &session.stop_reason {
            lines.push(format!("Stop reason: {reason}"));
        }
        lines.join("\n")
    }
}
