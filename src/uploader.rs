//! Per-file upload pipeline and directory batch driver.
//!
//! Each file moves through validate → dedup check → quota gate → raw byte
//! transfer → media-item creation → state commit, ending in one of three
//! terminal states: uploaded, skipped, or failed. Skips (unsupported format,
//! empty, oversized, already uploaded) are not errors and are never retried.
//!
//! The raw byte transfer does not bill against the request quota; only the
//! media-item creation call does.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::media;
use crate::quota::{Operation, QuotaTracker};
use crate::remote::{PhotoLibrary, UploadToken};
use crate::state::SharedState;
use crate::walker;

/// Terminal state of one file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { media_item_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

/// Counts for one directory batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryTotals {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Result of validating a file before upload.
enum Validation {
    Ok,
    Skip(String),
    Fail(String),
}

/// Uploads media files to the remote service, one at a time.
pub struct MediaUploader {
    library: Arc<dyn PhotoLibrary>,
    state: SharedState,
    quota: QuotaTracker,
    retry: RetryPolicy,
    /// Total supported files in the target tree, for progress lines.
    total_files: u64,
}

impl MediaUploader {
    pub fn new(library: Arc<dyn PhotoLibrary>, state: SharedState, quota: QuotaTracker) -> Self {
        Self {
            library,
            state,
            quota,
            retry: RetryPolicy::default(),
            total_files: 0,
        }
    }

    /// Set the total supported-file count for progress reporting.
    pub fn set_total_files(&mut self, total: u64) {
        self.total_files = total;
    }

    /// Upload a single file, optionally placing it directly into an album.
    pub async fn upload_file(&self, file: &Path, album_id: Option<&str>) -> UploadOutcome {
        match self.validate(file).await {
            Validation::Ok => {}
            Validation::Skip(reason) => {
                debug!(file = %file.display(), %reason, "Skipping file");
                return UploadOutcome::Skipped { reason };
            }
            Validation::Fail(error) => {
                return UploadOutcome::Failed { error };
            }
        }

        // Dedup: a path that already uploaded is never re-sent. This is what
        // makes re-running the tool over the same tree idempotent.
        {
            let state = self.state.lock().await;
            if state.is_file_uploaded(file) {
                debug!(file = %file.display(), "Already uploaded, skipping");
                return UploadOutcome::Skipped {
                    reason: "Already uploaded".to_string(),
                };
            }
        }

        if let Err(reason) = self.quota.can_perform(Operation::UploadFile).await {
            error!(file = %file.display(), %reason, "Cannot upload file");
            return UploadOutcome::Failed {
                error: format!("Quota limit: {reason}"),
            };
        }

        self.log_progress(file).await;

        let token = match self.transfer_bytes(file).await {
            Ok(token) => token,
            Err(error) => return UploadOutcome::Failed { error },
        };

        let media_item_id = match self.commit_media_item(file, &token, album_id).await {
            Ok(id) => id,
            Err(error) => return UploadOutcome::Failed { error },
        };

        {
            let mut state = self.state.lock().await;
            state.mark_file_uploaded(file, media_item_id.clone(), album_id.map(str::to_string));
        }

        info!(file = %file.display(), "Uploaded");
        UploadOutcome::Uploaded { media_item_id }
    }

    /// Upload the files directly inside a directory (non-recursive).
    ///
    /// Files go sequentially; unsupported ones fall out of validation as
    /// skips. State is persisted after every file. The batch
    /// halts early with a persisted stop reason the moment the quota gate
    /// fails, and when the cancellation token fires no further file starts.
    pub async fn upload_directory(
        &self,
        directory: &Path,
        album_id: Option<&str>,
        shutdown: &CancellationToken,
    ) -> DirectoryTotals {
        let mut totals = DirectoryTotals::default();

        let files = walker::list_files(directory);
        let supported = files.iter().filter(|f| media::is_supported(f)).count();
        if supported == 0 {
            info!(directory = %directory.display(), "No supported media files found");
            return totals;
        }
        info!(
            directory = %directory.display(),
            supported,
            total = files.len(),
            "Found supported files"
        );

        for file in files {
            if shutdown.is_cancelled() {
                info!("Interruption requested, not starting further uploads");
                break;
            }

            // Quota exhaustion is a global stop condition, not a per-file
            // error: check before starting and halt the whole batch.
            if let Err(reason) = self.quota.can_perform(Operation::UploadFile).await {
                warn!(%reason, "Stopping uploads");
                let mut state = self.state.lock().await;
                state.set_stop_reason(&reason);
                state.save().await;
                break;
            }

            let outcome = self.upload_file(&file, album_id).await;

            {
                let mut state = self.state.lock().await;
                state.increment_files_processed();
                match &outcome {
                    UploadOutcome::Uploaded { .. } => totals.uploaded += 1,
                    UploadOutcome::Skipped { reason } => {
                        debug!(file = %file.display(), %reason, "Skipped");
                        totals.skipped += 1;
                    }
                    UploadOutcome::Failed { error } => {
                        error!(file = %file.display(), %error, "Upload failed");
                        state.mark_file_failed(&file, error);
                        totals.failed += 1;
                    }
                }
                state.save().await;
            }
        }

        info!(
            directory = %directory.display(),
            uploaded = totals.uploaded,
            skipped = totals.skipped,
            failed = totals.failed,
            "Directory upload complete"
        );
        totals
    }

    /// Validate a file against existence, format, and size rules.
    ///
    /// Unsupported format, empty, and oversized files are skips (no retry,
    /// not counted as errors); a missing or unreadable path is a failure.
    async fn validate(&self, file: &Path) -> Validation {
        let metadata = match tokio::fs::metadata(file).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Validation::Fail("File does not exist".to_string());
            }
            Err(e) => {
                return Validation::Fail(format!("Cannot access file: {e}"));
            }
        };

        if !metadata.is_file() {
            return Validation::Fail("Path is not a file".to_string());
        }

        let Some(kind) = media::classify(file) else {
            return Validation::Skip("Unsupported file format".to_string());
        };

        let size = metadata.len();
        if size == 0 {
            return Validation::Skip("Empty file".to_string());
        }
        if size > kind.max_size() {
            return Validation::Skip(format!(
                "File too large: {} > {}",
                media::format_size(size),
                media::format_size(kind.max_size())
            ));
        }

        Validation::Ok
    }

    /// Stream the file's bytes to the upload endpoint, returning the opaque
    /// upload token.
    ///
    /// 401 refreshes the token and retries immediately (it is not rate
    /// limiting); 429 and other failures back off exponentially up to the
    /// retry ceiling. This transfer does not consume accounted quota.
    async fn transfer_bytes(&self, file: &Path) -> Result<UploadToken, String> {
        for attempt in 0..self.retry.total_attempts() {
            debug!(file = %file.display(), attempt = attempt + 1, "Transferring bytes");

            match self.library.upload_bytes(file).await {
                Ok(token) => return Ok(token),
                Err(e) if e.is_auth_expired() => {
                    warn!(file = %file.display(), "Got 401, refreshing token");
                    if let Err(refresh_err) = self.library.refresh_auth().await {
                        error!(error = %refresh_err, "Token refresh failed");
                        if attempt < self.retry.max_retries {
                            tokio::time::sleep(self.retry.delay(attempt)).await;
                        }
                    }
                    // Retry immediately with the refreshed token.
                }
                Err(e) if e.is_rate_limited() => {
                    let delay = self.retry.delay(attempt);
                    warn!(file = %file.display(), ?delay, "Rate limited transferring bytes");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(file = %file.display(), error = %e, "Byte transfer failed");
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }

        Err(format!(
            "Failed to upload file bytes after {} attempts",
            self.retry.total_attempts()
        ))
    }

    /// Redeem the upload token into a media item and record the billed
    /// request.
    ///
    /// If recording the request reports quota exhaustion the upload is
    /// treated as failed even though the remote commit succeeded: no further
    /// operations are safe.
    async fn commit_media_item(
        &self,
        file: &Path,
        token: &UploadToken,
        album_id: Option<&str>,
    ) -> Result<String, String> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for attempt in 0..self.retry.total_attempts() {
            debug!(file = %file.display(), attempt = attempt + 1, "Creating media item");

            match self
                .library
                .create_media_item(token, &file_name, album_id)
                .await
            {
                Ok(result) => {
                    if !self.quota.record_requests(1).await {
                        return Err("Quota exhausted during media item creation".to_string());
                    }

                    if result.succeeded() {
                        if let Some(item) = result.media_item {
                            debug!(file = %file.display(), id = %item.id, "Created media item");
                            return Ok(item.id);
                        }
                    }
                    return Err(format!(
                        "Failed to create media item: {}",
                        result.error_message()
                    ));
                }
                Err(e) if e.is_auth_expired() => {
                    warn!(file = %file.display(), "Got 401, refreshing token");
                    if let Err(refresh_err) = self.library.refresh_auth().await {
                        error!(error = %refresh_err, "Token refresh failed");
                        if attempt < self.retry.max_retries {
                            tokio::time::sleep(self.retry.delay(attempt)).await;
                        }
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    let delay = self.retry.delay(attempt);
                    warn!(file = %file.display(), ?delay, "Rate limited creating media item");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(file = %file.display(), error = %e, "Media item creation failed");
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }

        Err(format!(
            "Failed to create media item after {} attempts",
            self.retry.total_attempts()
        ))
    }

    async fn log_progress(&self, file: &Path) {
        let size = tokio::fs::metadata(file)
            .await
            .map(|m| media::format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());

        if self.total_files > 0 {
            let uploaded = {
                let state = self.state.lock().await;
                state.uploaded_count() as u64
            };
            let remaining = self.total_files.saturating_sub(uploaded);
            info!(
                file = %file.display(),
                size = %size,
                remaining,
                "Uploading"
            );
        } else {
            info!(file = %file.display(), size = %size, "Uploading");
        }
    }
}
