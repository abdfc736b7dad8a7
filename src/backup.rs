//! Backup orchestration.
//!
//! Drives one backup run end to end: load state, start a session, resolve
//! albums, upload directory by directory, and report. Strictly sequential;
//! the only asynchronous concern is the cancellation token checked between
//! files and directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::album::{AlbumDecision, AlbumManager, ExistsPolicy};
use crate::config::{DEFAULT_MAX_DAILY_REQUESTS, DEFAULT_MAX_REQUESTS_PER_SESSION};
use crate::error::{AlbumListingSnafu, BackupError, CustomAlbumSnafu};
use crate::quota::{QuotaLimit, QuotaTracker};
use crate::remote::PhotoLibrary;
use crate::state::{SharedState, StateStore};
use crate::uploader::MediaUploader;
use crate::walker::{self, AlbumNaming};

/// How to treat existing persisted state at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Resume from whatever the state file records.
    #[default]
    Resume,
    /// Delete the state file and start from scratch.
    Full,
    /// Zero both quota counters, keep upload progress.
    QuotaOnly,
    /// Set the daily counter to a known value (mirroring externally observed
    /// usage), zero the session counter, keep upload progress.
    SetDailyUsage(u64),
}

/// Options for one backup run.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Target directory (made absolute before use).
    pub directory: PathBuf,
    /// Directory holding persisted state files.
    pub state_dir: PathBuf,
    pub exists_policy: ExistsPolicy,
    pub naming: AlbumNaming,
    /// Single custom album receiving every file, overriding directory-based
    /// naming.
    pub custom_album: Option<String>,
    pub max_session_requests: u64,
    pub max_daily_requests: u64,
    pub reset: ResetMode,
}

impl BackupOptions {
    pub fn new(directory: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            directory,
            state_dir,
            exists_policy: ExistsPolicy::Stop,
            naming: AlbumNaming::Relative,
            custom_album: None,
            max_session_requests: DEFAULT_MAX_REQUESTS_PER_SESSION,
            max_daily_requests: DEFAULT_MAX_DAILY_REQUESTS,
            reset: ResetMode::Resume,
        }
    }
}

/// Final tallies of one run.
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run ended because of a signal (a clean stop, not a failure).
    pub interrupted: bool,
    /// A target halted under the STOP album policy.
    pub halted_on_existing_album: bool,
}

impl BackupReport {
    /// True when every processed file either uploaded or was legitimately
    /// skipped.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.halted_on_existing_album
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn validate_target(directory: &Path) -> Result<(), BackupError> {
    if !directory.exists() {
        return Err(BackupError::DirectoryNotFound {
            path: directory.to_path_buf(),
        });
    }
    if !directory.is_dir() {
        return Err(BackupError::NotADirectory {
            path: directory.to_path_buf(),
        });
    }
    Ok(())
}

/// Load state, applying the requested reset mode.
async fn prepare_state(options: &BackupOptions, base: &Path) -> SharedState {
    let mut store = StateStore::load(&options.state_dir, base).await;

    match options.reset {
        ResetMode::Resume => {}
        ResetMode::Full => {
            info!("Resetting state (fresh start)");
            store.delete_file().await;
            store = StateStore::load(&options.state_dir, base).await;
        }
        ResetMode::QuotaOnly => {
            info!("Resetting quota counters to 0, keeping upload progress");
            store.reset_quota(None);
            store.save().await;
        }
        ResetMode::SetDailyUsage(count) => {
            info!(count, "Setting daily quota usage, keeping upload progress");
            store.reset_quota(Some(count));
            store.save().await;
        }
    }

    store.into_shared()
}

/// Run a full backup against the remote library.
pub async fn run_backup(
    options: BackupOptions,
    library: Arc<dyn PhotoLibrary>,
    shutdown: CancellationToken,
) -> Result<BackupReport, BackupError> {
    let base = absolute(&options.directory);
    validate_target(&base)?;

    info!(directory = %base.display(), "Starting photo backup");

    let state = prepare_state(&options, &base).await;

    // Explain how the previous run ended before doing any work.
    {
        let store = state.lock().await;
        if let Some(reason) = store.stop_reason() {
            info!(previous_stop_reason = %reason, "Previous run ended early");
        }
        if let Some(last) = &store.state().current_session.last_processed_directory {
            info!(
                last_processed = %last,
                already_uploaded = store.uploaded_count(),
                "Resuming from previous session"
            );
        }
    }

    {
        let mut store = state.lock().await;
        store.start_new_session();
        store.save().await;
    }

    info!("Analyzing backup scope");
    let scope = walker::estimate_scope(&base);
    let already_uploaded = {
        let store = state.lock().await;
        store.uploaded_count() as u64
    };
    info!(
        total_files = scope.files,
        already_uploaded,
        remaining = scope.files.saturating_sub(already_uploaded),
        directories = scope.directories,
        estimated_requests = scope.estimated_requests,
        "Backup scope"
    );
    if scope.estimated_requests > options.max_daily_requests {
        warn!(
            estimated = scope.estimated_requests,
            daily_limit = options.max_daily_requests,
            "Large backup: this may require multiple days to complete"
        );
    }

    let quota = QuotaTracker::with_daily_limit(
        state.clone(),
        options.max_session_requests,
        options.max_daily_requests,
    );
    if let Some(warning) = quota.usage_warning().await {
        warn!("{warning}");
    }

    let mut albums = AlbumManager::new(library.clone(), state.clone(), quota.clone());
    let mut uploader = MediaUploader::new(library, state.clone(), quota.clone());
    uploader.set_total_files(scope.files);

    albums.load_remote_albums().await.context(AlbumListingSnafu)?;

    // A custom album is created (or resolved) exactly once, up front.
    let custom_album_id = match &options.custom_album {
        Some(name) => {
            info!(album = %name, "Using a single album for all files");
            match albums.get_or_create_album(name, options.exists_policy).await {
                Ok(AlbumDecision::SkippedExisting) => {
                    info!(album = %name, "Album exists and policy is skip; nothing to do");
                    return Ok(BackupReport::default());
                }
                Ok(decision) => decision.id().map(str::to_string),
                Err(e) => {
                    return Err(e).context(CustomAlbumSnafu { name: name.clone() });
                }
            }
        }
        None => None,
    };

    let (directories, _) = walker::media_directories(&base);
    if directories.is_empty() {
        warn!("No directories with supported media files found");
        return Ok(BackupReport::default());
    }
    info!(count = directories.len(), "Found directories to process");

    let mut report = BackupReport::default();

    for directory in &directories {
        if shutdown.is_cancelled() {
            report.interrupted = true;
            break;
        }

        {
            let mut store = state.lock().await;
            store.set_last_processed_directory(directory);
        }

        let outcome = process_directory(
            directory,
            &base,
            &options,
            custom_album_id.as_deref(),
            &mut albums,
            &uploader,
            &shutdown,
        )
        .await;

        report.uploaded += outcome.uploaded;
        report.skipped += outcome.skipped;
        report.failed += outcome.failed;

        if outcome.halt {
            report.halted_on_existing_album = outcome.halted_on_existing_album;
            if let Some(reason) = outcome.halt_reason {
                let mut store = state.lock().await;
                store.set_stop_reason(&reason);
            }
            let mut store = state.lock().await;
            store.save().await;
            break;
        }

        // A stop reason recorded during the directory (a quota ceiling or
        // insufficient headroom) ends the whole run, not just that batch.
        let stopped = {
            let store = state.lock().await;
            store.stop_reason().is_some()
        };
        if stopped || quota.check_limits().await != QuotaLimit::None {
            let mut store = state.lock().await;
            store.save().await;
            break;
        }

        let mut store = state.lock().await;
        store.save().await;
    }

    if shutdown.is_cancelled() {
        report.interrupted = true;
        let mut store = state.lock().await;
        store.set_stop_reason("Interrupted by signal");
        store.save().await;
    }

    // Final summary.
    {
        let store = state.lock().await;
        info!("Backup summary:\n{}", store.summary());
    }
    info!("{}", quota.summary().await);
    info!("{}", albums.summary().await);
    info!(
        uploaded = report.uploaded,
        skipped = report.skipped,
        failed = report.failed,
        interrupted = report.interrupted,
        "Run complete"
    );

    Ok(report)
}

/// Per-directory outcome, including whether the whole run must halt.
struct DirectoryOutcome {
    uploaded: usize,
    skipped: usize,
    failed: usize,
    halt: bool,
    halted_on_existing_album: bool,
    halt_reason: Option<String>,
}

impl DirectoryOutcome {
    fn counts(uploaded: usize, skipped: usize, failed: usize) -> Self {
        Self {
            uploaded,
            skipped,
            failed,
            halt: false,
            halted_on_existing_album: false,
            halt_reason: None,
        }
    }
}

async fn process_directory(
    directory: &Path,
    base: &Path,
    options: &BackupOptions,
    custom_album_id: Option<&str>,
    albums: &mut AlbumManager,
    uploader: &MediaUploader,
    shutdown: &CancellationToken,
) -> DirectoryOutcome {
    let (_, supported) = walker::directory_media_count(directory);
    if supported == 0 {
        return DirectoryOutcome::counts(0, 0, 0);
    }

    let album_name = match &options.custom_album {
        Some(name) => name.clone(),
        None => walker::album_name_for(directory, base, options.naming),
    };
    info!(directory = %directory.display(), album = %album_name, "Processing directory");

    let album_id = match custom_album_id {
        Some(id) => Some(id.to_string()),
        None => {
            match albums
                .get_or_create_album(&album_name, options.exists_policy)
                .await
            {
                Ok(AlbumDecision::SkippedExisting) => {
                    info!(album = %album_name, "Skipped existing album");
                    return DirectoryOutcome::counts(0, supported, 0);
                }
                Ok(decision) => decision.id().map(str::to_string),
                Err(e) => {
                    error!(album = %album_name, error = %e, "Failed to create or resolve album");
                    let halted_on_existing =
                        matches!(e, crate::error::AlbumError::AlreadyExists { .. });
                    return DirectoryOutcome {
                        uploaded: 0,
                        skipped: 0,
                        failed: supported,
                        halt: true,
                        halted_on_existing_album: halted_on_existing,
                        halt_reason: Some(format!(
                            "Failed to process directory {}: {e}",
                            directory.display()
                        )),
                    };
                }
            }
        }
    };

    let totals = uploader
        .upload_directory(directory, album_id.as_deref(), shutdown)
        .await;
    DirectoryOutcome::counts(totals.uploaded, totals.skipped, totals.failed)
}

/// Dry-run: walk the tree and report what would be uploaded, issuing no
/// remote calls and recording nothing.
pub async fn run_preview(options: BackupOptions) -> Result<BackupReport, BackupError> {
    let base = absolute(&options.directory);
    validate_target(&base)?;

    info!(directory = %base.display(), "Dry run: no uploads will happen");

    let (directories, _) = walker::media_directories(&base);
    if directories.is_empty() {
        warn!("No directories with supported media files found");
        return Ok(BackupReport::default());
    }

    let mut preview: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_files = 0usize;

    for directory in &directories {
        let (_, supported) = walker::directory_media_count(directory);
        if supported == 0 {
            continue;
        }
        let album_name = match &options.custom_album {
            Some(name) => name.clone(),
            None => walker::album_name_for(directory, &base, options.naming),
        };
        *preview.entry(album_name).or_default() += supported;
        total_files += supported;
    }

    info!("Albums that would be created:");
    for (album, count) in &preview {
        info!("   '{album}' -> {count} files");
    }
    info!(
        albums = preview.len(),
        files = total_files,
        "Dry run complete"
    );

    Ok(BackupReport {
        uploaded: 0,
        skipped: total_files,
        failed: 0,
        interrupted: false,
        halted_on_existing_album: false,
    })
}
