//! Remote photo-library service interface.
//!
//! The service is consumed through the [`PhotoLibrary`] trait so the upload
//! and album logic can be exercised against an in-memory implementation in
//! tests. The production implementation lives in [`http`]; credential
//! handling in [`auth`].
//!
//! A service quirk the design accepts rather than works around: the API only
//! exposes albums created by this tool's credentials, so the album listing is
//! a best-effort view, never the user's whole library.

pub mod auth;
pub mod http;

pub use auth::{Credentials, TokenManager};
pub use http::HttpPhotoLibrary;

use std::path::Path;

use async_trait::async_trait;

use crate::error::RemoteError;

/// A remote album visible to this tool.
#[derive(Debug, Clone)]
pub struct Album {
    pub id: String,
    pub title: String,
}

/// One page of the album listing.
#[derive(Debug, Clone, Default)]
pub struct AlbumPage {
    pub albums: Vec<Album>,
    pub next_page_token: Option<String>,
}

/// Opaque handle returned by a raw byte transfer, redeemed exactly once when
/// creating the corresponding media item.
#[derive(Debug, Clone)]
pub struct UploadToken(pub String);

/// A created media item.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: String,
}

/// Per-item result of a batched remote call.
///
/// The service reports success inconsistently: sometimes a numeric code 0,
/// sometimes a literal "Success" message, sometimes only the presence of the
/// media item. All three are treated as equally authoritative.
#[derive(Debug, Clone, Default)]
pub struct ItemResult {
    pub status_code: Option<i64>,
    pub status_message: Option<String>,
    pub media_item: Option<MediaItem>,
}

impl ItemResult {
    pub fn succeeded(&self) -> bool {
        self.status_code == Some(0)
            || self.status_message.as_deref() == Some("Success")
            || self.media_item.is_some()
    }

    /// Error message for a failed item, if the service provided one.
    pub fn error_message(&self) -> &str {
        self.status_message.as_deref().unwrap_or("Unknown error")
    }
}

/// Capability set of the remote photo-library service.
#[async_trait]
pub trait PhotoLibrary: Send + Sync {
    /// One page of albums visible to this tool's credentials (page size 50).
    async fn list_albums(&self, page_token: Option<&str>) -> Result<AlbumPage, RemoteError>;

    /// Create an album with the given (already sanitized) title.
    async fn create_album(&self, title: &str) -> Result<Album, RemoteError>;

    /// Add media items to an album in one batched call.
    async fn add_to_album(
        &self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> Result<Vec<ItemResult>, RemoteError>;

    /// Stream a file's bytes to the upload endpoint. Does not bill against
    /// the request quota.
    async fn upload_bytes(&self, file: &Path) -> Result<UploadToken, RemoteError>;

    /// Commit an upload token into a media item, optionally placing it
    /// directly into an album.
    async fn create_media_item(
        &self,
        token: &UploadToken,
        file_name: &str,
        album_id: Option<&str>,
    ) -> Result<ItemResult, RemoteError>;

    /// Force a bearer-token refresh (used after a 401).
    async fn refresh_auth(&self) -> Result<(), RemoteError>;
}
