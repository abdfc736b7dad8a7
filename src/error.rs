//! Error types for the backup tool.

use std::path::PathBuf;

use snafu::prelude::*;

/// Errors from the remote photo service.
///
/// The transient variants (`RateLimited`, `AuthExpired`, `Status`) are
/// candidates for retry; the callers own the retry policy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RemoteError {
    /// The service responded 429.
    #[snafu(display("Rate limited by remote service"))]
    RateLimited,

    /// The service responded 401; the bearer token needs a refresh.
    #[snafu(display("Authorization expired: {message}"))]
    AuthExpired { message: String },

    /// The service responded 409 (resource probably already exists).
    #[snafu(display("Remote conflict: resource may already exist"))]
    Conflict,

    /// The service responded 403. For album listing this means "no albums
    /// created by this tool yet", not a failure.
    #[snafu(display("Permission denied by remote service"))]
    PermissionDenied,

    /// Any other non-success HTTP status.
    #[snafu(display("Remote service returned {code}: {message}"))]
    Status { code: u16, message: String },

    /// Network-level failure.
    #[snafu(display("Transport error: {source}"))]
    Transport { source: reqwest::Error },

    /// Response body did not match the expected shape.
    #[snafu(display("Malformed remote response: {message}"))]
    Malformed { message: String },

    /// The local file could not be read for transfer.
    #[snafu(display("Failed to read file for transfer: {source}"))]
    FileRead { source: std::io::Error },

    /// Credential handling failed.
    #[snafu(display("Authentication error: {source}"))]
    Auth { source: AuthError },
}

impl RemoteError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited)
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, RemoteError::AuthExpired { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RemoteError::PermissionDenied)
    }
}

/// Errors during credential loading and token refresh.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AuthError {
    /// The credentials file is absent. Fatal: the run cannot proceed.
    #[snafu(display("Credentials file not found: {}", path.display()))]
    MissingCredentials { path: PathBuf },

    /// The credentials file could not be read.
    #[snafu(display("Failed to read credentials file: {source}"))]
    ReadCredentials { source: std::io::Error },

    /// The credentials file is not valid JSON of the expected shape.
    #[snafu(display("Failed to parse credentials file: {source}"))]
    ParseCredentials { source: serde_json::Error },

    /// The token endpoint rejected the refresh request.
    #[snafu(display("Token refresh failed with status {status}: {message}"))]
    Refresh { status: u16, message: String },

    /// Network-level failure talking to the token endpoint.
    #[snafu(display("Token refresh transport error: {source}"))]
    RefreshTransport { source: reqwest::Error },
}

/// Errors during state persistence.
///
/// `StateStore::save` swallows these (logging and preserving the previous
/// on-disk snapshot); they surface only from explicit maintenance operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StateError {
    /// IO failure reading or writing a state file.
    #[snafu(display("State file IO error: {source}"))]
    Io { source: std::io::Error },

    /// Failed to serialize the state snapshot.
    #[snafu(display("Failed to serialize state: {source}"))]
    Serialize { source: serde_json::Error },
}

/// Errors during album management.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AlbumError {
    /// The name sanitized to an empty string.
    #[snafu(display("Invalid album name: '{name}'"))]
    InvalidName { name: String },

    /// The quota tracker refused the operation.
    #[snafu(display("Quota denied: {reason}"))]
    QuotaDenied { reason: String },

    /// The quota ceiling was crossed while recording a request.
    #[snafu(display("Quota exhausted after remote call"))]
    QuotaExhausted,

    /// Remote call failed after exhausting retries.
    #[snafu(display("Gave up on {operation} after {attempts} attempts: {message}"))]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// The album already exists and the STOP policy forbids touching it.
    #[snafu(display(
        "Album '{name}' already exists (use --skip-existing or --merge-existing)"
    ))]
    AlreadyExists { name: String },

    /// A 409 was received but the conflicting album could not be found.
    #[snafu(display("Album '{name}' conflicts remotely but was not found"))]
    ConflictUnresolved { name: String },

    /// A batched add reported zero successful items.
    #[snafu(display("No media items were added to album {album_id}"))]
    NothingAdded { album_id: String },

    /// Listing albums failed outright.
    #[snafu(display("Failed to list remote albums: {source}"))]
    ListFailed { source: RemoteError },
}

/// Top-level errors terminating a backup run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackupError {
    /// Target directory does not exist.
    #[snafu(display("Directory does not exist: {}", path.display()))]
    DirectoryNotFound { path: PathBuf },

    /// Target path is not a directory.
    #[snafu(display("Path is not a directory: {}", path.display()))]
    NotADirectory { path: PathBuf },

    /// The remote album cache could not be populated.
    #[snafu(display("Failed to load existing albums: {source}"))]
    AlbumListing { source: AlbumError },

    /// The single custom album could not be created or resolved.
    #[snafu(display("Failed to prepare album '{name}': {source}"))]
    CustomAlbum { name: String, source: AlbumError },
}
