//! Shoebox: resumable Google Photos backup with album organization.
//!
//! This crate handles:
//! - Uploading a local directory tree to the Google Photos Library API,
//!   mapping directories to albums
//! - Durable per-target state (uploads, failures, created albums) with
//!   atomic-rename persistence, safe to kill at any point
//! - Two-tier request quota accounting (per-session and per-day, with the
//!   daily window keyed to the service's Pacific-time reset)
//! - Exponential-backoff retries for transient remote failures
//!
//! Re-running the tool over the same tree is idempotent: files recorded as
//! uploaded are skipped, and interrupted runs resume where they stopped.

pub mod album;
pub mod backup;
pub mod calendar;
pub mod config;
pub mod error;
pub mod media;
pub mod quota;
pub mod remote;
pub mod signal;
pub mod state;
pub mod uploader;
pub mod walker;

// Re-export commonly used items
pub use album::{AlbumDecision, AlbumManager, ExistsPolicy};
pub use backup::{run_backup, run_preview, BackupOptions, BackupReport, ResetMode};
pub use error::{BackupError, RemoteError};
pub use quota::{Operation, QuotaTracker};
pub use remote::{HttpPhotoLibrary, PhotoLibrary, TokenManager};
pub use state::{StateStore, SharedState};
pub use uploader::{MediaUploader, UploadOutcome};
pub use walker::AlbumNaming;
