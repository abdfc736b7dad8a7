//! Idempotent album management.
//!
//! Maps logical album names to remote album ids, consulting the state
//! store's record of albums this tool created first and a process-lifetime
//! cache of remote albums second. The remote service only exposes albums
//! created by this tool's credentials, so the cache is best-effort.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ALBUM_NAME_INVALID_CHARS, MAX_ALBUM_NAME_LENGTH, RetryPolicy};
use crate::error::{AlbumError, RemoteError};
use crate::quota::{Operation, QuotaTracker};
use crate::remote::PhotoLibrary;
use crate::state::SharedState;

/// What to do when the desired album name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistsPolicy {
    /// Leave the existing album alone and skip uploading into it.
    Skip,
    /// Upload into the existing album.
    Merge,
    /// Refuse to touch the existing album; halt this target.
    #[default]
    Stop,
}

/// Outcome of resolving an album name to an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumDecision {
    /// A new album was created.
    Created { id: String },
    /// An existing album will be reused (MERGE policy).
    Existing { id: String },
    /// The album exists and the SKIP policy forbids uploading into it.
    SkippedExisting,
}

impl AlbumDecision {
    /// Album id to upload into, when uploading is allowed.
    pub fn id(&self) -> Option<&str> {
        match self {
            AlbumDecision::Created { id } | AlbumDecision::Existing { id } => Some(id),
            AlbumDecision::SkippedExisting => None,
        }
    }
}

/// Sanitize an album name to the remote service's rules: illegal characters
/// become spaces, whitespace collapses, and the result is truncated to the
/// remote maximum length.
pub fn sanitize_album_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| {
            if ALBUM_NAME_INVALID_CHARS.contains(ch) {
                ' '
            } else {
                ch
            }
        })
        .collect();

    let mut sanitized = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if sanitized.len() > MAX_ALBUM_NAME_LENGTH {
        let mut cut = MAX_ALBUM_NAME_LENGTH;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized = sanitized.trim_end().to_string();
    }
    sanitized
}

/// Process-lifetime cache of the remote album listing.
///
/// Loaded at most once per process and never invalidated during a run;
/// `invalidate` exists for tests and future maintenance commands.
#[derive(Debug, Default)]
pub struct AlbumCache {
    entries: Option<HashMap<String, String>>,
}

impl AlbumCache {
    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    pub fn get(&self, title: &str) -> Option<&str> {
        self.entries.as_ref()?.get(title).map(String::as_str)
    }

    pub fn insert(&mut self, title: &str, id: &str) {
        if let Some(entries) = self.entries.as_mut() {
            entries.insert(title.to_string(), id.to_string());
        }
    }

    pub fn populate(&mut self, entries: HashMap<String, String>) {
        self.entries = Some(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the cached listing so the next lookup reloads it.
    pub fn invalidate(&mut self) {
        self.entries = None;
    }
}

/// Manages remote albums for one backup target.
pub struct AlbumManager {
    library: Arc<dyn PhotoLibrary>,
    state: SharedState,
    quota: QuotaTracker,
    retry: RetryPolicy,
    cache: AlbumCache,
}

impl AlbumManager {
    pub fn new(library: Arc<dyn PhotoLibrary>, state: SharedState, quota: QuotaTracker) -> Self {
        Self {
            library,
            state,
            quota,
            retry: RetryPolicy::default(),
            cache: AlbumCache::default(),
        }
    }

    /// Load the remote album listing into the cache, once per process.
    ///
    /// A 429 retries the same page after a fixed delay; a 403 is the
    /// service's way of saying "no albums created by this tool yet" and is
    /// treated as a normal empty result.
    pub async fn load_remote_albums(&mut self) -> Result<(), AlbumError> {
        if self.cache.is_loaded() {
            return Ok(());
        }

        info!("Loading albums created by this tool from the remote service");

        self.quota
            .can_perform(Operation::ListAlbums {
                estimated_albums: 100,
            })
            .await
            .map_err(|reason| AlbumError::QuotaDenied { reason })?;

        let mut entries = HashMap::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            if !self.quota.can_make_requests(1).await {
                return Err(AlbumError::QuotaDenied {
                    reason: "Quota exhausted while listing albums".to_string(),
                });
            }

            let mut rate_limit_attempts = 0u32;
            let page = loop {
                match self.library.list_albums(page_token.as_deref()).await {
                    Ok(page) => break Some(page),
                    Err(e) if e.is_rate_limited() => {
                        rate_limit_attempts += 1;
                        if rate_limit_attempts > self.retry.max_retries {
                            return Err(AlbumError::ListFailed {
                                source: RemoteError::RateLimited,
                            });
                        }
                        warn!("Rate limited while listing albums, retrying page");
                        tokio::time::sleep(self.retry.base_delay).await;
                    }
                    Err(e) if e.is_permission_denied() => {
                        debug!("Listing answered 403: no albums created by this tool yet");
                        break None;
                    }
                    Err(e) => return Err(AlbumError::ListFailed { source: e }),
                }
            };

            let Some(page) = page else {
                break;
            };

            if !self.quota.record_requests(1).await {
                return Err(AlbumError::QuotaExhausted);
            }

            pages += 1;
            for album in page.albums {
                entries.insert(album.title, album.id);
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        info!(albums = entries.len(), pages, "Loaded existing albums");
        self.cache.populate(entries);
        Ok(())
    }

    /// Check whether an album with this (sanitized) name exists.
    ///
    /// The state store's created-album map is authoritative for albums this
    /// tool knows it created; the remote cache covers the rest.
    pub async fn album_exists(&mut self, name: &str) -> Result<Option<String>, AlbumError> {
        {
            let state = self.state.lock().await;
            if let Some(id) = state.album_id(name) {
                return Ok(Some(id));
            }
        }

        self.load_remote_albums().await?;
        Ok(self.cache.get(name).map(str::to_string))
    }

    /// Create an album, retrying transient failures with exponential backoff.
    ///
    /// A 409 means the album probably already exists; the response is a
    /// best-effort lookup rather than a failure.
    pub async fn create_album(&mut self, name: &str) -> Result<String, AlbumError> {
        let sanitized = sanitize_album_name(name);
        if sanitized.is_empty() {
            return Err(AlbumError::InvalidName {
                name: name.to_string(),
            });
        }

        self.quota
            .can_perform(Operation::CreateAlbum)
            .await
            .map_err(|reason| AlbumError::QuotaDenied { reason })?;

        let mut last_error = String::new();
        for attempt in 0..self.retry.total_attempts() {
            info!(album = %sanitized, attempt = attempt + 1, "Creating album");

            match self.library.create_album(&sanitized).await {
                Ok(album) => {
                    if !self.quota.record_requests(1).await {
                        return Err(AlbumError::QuotaExhausted);
                    }
                    info!(album = %sanitized, id = %album.id, "Created album");
                    self.remember_album(&sanitized, &album.id).await;
                    return Ok(album.id);
                }
                Err(e) if e.is_conflict() => {
                    warn!(album = %sanitized, "Create answered 409, looking up existing album");
                    match self.album_exists(&sanitized).await? {
                        Some(id) => {
                            self.remember_album(&sanitized, &id).await;
                            return Ok(id);
                        }
                        None => {
                            return Err(AlbumError::ConflictUnresolved { name: sanitized });
                        }
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    let delay = self.retry.delay(attempt);
                    warn!(album = %sanitized, ?delay, "Rate limited creating album");
                    last_error = e.to_string();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(album = %sanitized, error = %e, "Failed to create album");
                    last_error = e.to_string();
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }

        Err(AlbumError::RetriesExhausted {
            operation: format!("create album '{sanitized}'"),
            attempts: self.retry.total_attempts(),
            message: last_error,
        })
    }

    /// Resolve an album name under the given exists-policy.
    ///
    /// No remote create call is issued when the album already exists,
    /// whatever the policy. Under STOP an existing album is an error the
    /// caller must treat as "halt this target".
    pub async fn get_or_create_album(
        &mut self,
        name: &str,
        policy: ExistsPolicy,
    ) -> Result<AlbumDecision, AlbumError> {
        let sanitized = sanitize_album_name(name);
        if sanitized.is_empty() {
            return Err(AlbumError::InvalidName {
                name: name.to_string(),
            });
        }

        if let Some(id) = self.album_exists(&sanitized).await? {
            info!(album = %sanitized, %id, "Album already exists");
            return match policy {
                ExistsPolicy::Skip => {
                    info!(album = %sanitized, "Skipping existing album");
                    Ok(AlbumDecision::SkippedExisting)
                }
                ExistsPolicy::Merge => {
                    self.remember_album(&sanitized, &id).await;
                    Ok(AlbumDecision::Existing { id })
                }
                ExistsPolicy::Stop => {
                    error!(
                        album = %sanitized,
                        "Album already exists; pass --skip-existing or --merge-existing to proceed"
                    );
                    Err(AlbumError::AlreadyExists { name: sanitized })
                }
            };
        }

        let id = self.create_album(&sanitized).await?;
        Ok(AlbumDecision::Created { id })
    }

    /// Add media items to an album in one batched call.
    ///
    /// Empty input is a no-op success. Per-item failures are logged but the
    /// call only fails when zero items succeeded; callers must not assume
    /// all-or-nothing.
    pub async fn add_media_to_album(
        &mut self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> Result<(), AlbumError> {
        if media_item_ids.is_empty() {
            debug!("No media items to add to album");
            return Ok(());
        }

        self.quota
            .can_perform(Operation::AddToAlbum)
            .await
            .map_err(|reason| AlbumError::QuotaDenied { reason })?;

        let mut last_error = String::new();
        for attempt in 0..self.retry.total_attempts() {
            match self.library.add_to_album(album_id, media_item_ids).await {
                Ok(results) => {
                    if !self.quota.record_requests(1).await {
                        return Err(AlbumError::QuotaExhausted);
                    }

                    if results.is_empty() {
                        info!(album_id, count = media_item_ids.len(), "Added media to album");
                        return Ok(());
                    }

                    let mut succeeded = 0usize;
                    for result in &results {
                        if result.succeeded() {
                            succeeded += 1;
                        } else {
                            warn!(
                                album_id,
                                error = result.error_message(),
                                "Failed to add one media item"
                            );
                        }
                    }

                    if succeeded == 0 {
                        return Err(AlbumError::NothingAdded {
                            album_id: album_id.to_string(),
                        });
                    }
                    info!(
                        album_id,
                        succeeded,
                        total = media_item_ids.len(),
                        "Added media to album"
                    );
                    return Ok(());
                }
                Err(e) if e.is_rate_limited() => {
                    let delay = self.retry.delay(attempt);
                    warn!(album_id, ?delay, "Rate limited adding media to album");
                    last_error = e.to_string();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(album_id, error = %e, "Failed to add media to album");
                    last_error = e.to_string();
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }

        Err(AlbumError::RetriesExhausted {
            operation: format!("add media to album {album_id}"),
            attempts: self.retry.total_attempts(),
            message: last_error,
        })
    }

    /// Human-readable album summary for the final report.
    pub async fn summary(&self) -> String {
        let state = self.state.lock().await;
        let created = &state.state().created_albums;
        let mut lines = vec![
            "Album summary:".to_string(),
            format!("   Created in this backup: {}", created.len()),
            format!("   Known remote albums: {}", self.cache.len()),
        ];
        for (name, id) in created {
            lines.push(format!("     - {name} ({id})"));
        }
        lines.join("\n")
    }

    /// Record a name → id mapping in both the state store and the cache.
    async fn remember_album(&mut self, name: &str, id: &str) {
        {
            let mut state = self.state.lock().await;
            state.add_created_album(name, id);
        }
        self.cache.insert(name, id);
    }

    #[cfg(test)]
    pub(crate) fn cache_mut(&mut self) -> &mut AlbumCache {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::{Album, AlbumPage, ItemResult, MediaItem, PhotoLibrary, UploadToken};
    use crate::state::StateStore;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_album_name() {
        assert_eq!(sanitize_album_name("2023/trip"), "2023 trip");
        assert_eq!(sanitize_album_name("  a   b  "), "a b");
        assert_eq!(sanitize_album_name("<>:\"|?*"), "");
        assert_eq!(sanitize_album_name("plain"), "plain");
    }

    #[test]
    fn test_sanitize_truncates_long_names() {
        let long = "x".repeat(MAX_ALBUM_NAME_LENGTH + 50);
        let sanitized = sanitize_album_name(&long);
        assert_eq!(sanitized.len(), MAX_ALBUM_NAME_LENGTH);
    }

    #[test]
    fn test_cache_lifecycle() {
        let mut cache = AlbumCache::default();
        assert!(!cache.is_loaded());
        assert_eq!(cache.get("trip"), None);

        // Inserts before population are dropped: the cache only mirrors a
        // listing that actually happened.
        cache.insert("early", "e1");
        assert!(!cache.is_loaded());

        cache.populate(HashMap::from([("trip".to_string(), "a1".to_string())]));
        assert!(cache.is_loaded());
        assert_eq!(cache.get("trip"), Some("a1"));

        cache.insert("more", "a2");
        assert_eq!(cache.len(), 2);

        cache.invalidate();
        assert!(!cache.is_loaded());
        assert_eq!(cache.get("trip"), None);
    }

    /// Minimal library stub: serves a fixed listing, counts create calls.
    struct StubLibrary {
        listing: Vec<Album>,
        creates: AtomicUsize,
    }

    impl StubLibrary {
        fn new(listing: Vec<Album>) -> Self {
            Self {
                listing,
                creates: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PhotoLibrary for StubLibrary {
        async fn list_albums(&self, _page_token: Option<&str>) -> Result<AlbumPage, RemoteError> {
            Ok(AlbumPage {
                albums: self.listing.clone(),
                next_page_token: None,
            })
        }

        async fn create_album(&self, title: &str) -> Result<Album, RemoteError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(Album {
                id: format!("created-{n}"),
                title: title.to_string(),
            })
        }

        async fn add_to_album(
            &self,
            _album_id: &str,
            media_item_ids: &[String],
        ) -> Result<Vec<ItemResult>, RemoteError> {
            // Ids prefixed "fail-" come back as per-item failures.
            Ok(media_item_ids
                .iter()
                .map(|id| {
                    if id.starts_with("fail-") {
                        ItemResult {
                            status_code: Some(13),
                            status_message: Some("Internal error".to_string()),
                            media_item: None,
                        }
                    } else {
                        ItemResult {
                            status_code: Some(0),
                            status_message: None,
                            media_item: Some(MediaItem { id: id.clone() }),
                        }
                    }
                })
                .collect())
        }

        async fn upload_bytes(&self, _file: &Path) -> Result<UploadToken, RemoteError> {
            Ok(UploadToken("token".to_string()))
        }

        async fn create_media_item(
            &self,
            _token: &UploadToken,
            _file_name: &str,
            _album_id: Option<&str>,
        ) -> Result<ItemResult, RemoteError> {
            Ok(ItemResult {
                status_code: Some(0),
                status_message: None,
                media_item: Some(MediaItem { id: "m".to_string() }),
            })
        }

        async fn refresh_auth(&self) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    async fn manager(listing: Vec<Album>) -> (AlbumManager, Arc<StubLibrary>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::load(temp.path(), Path::new("/tmp/photos")).await;
        let shared = store.into_shared();
        let quota = QuotaTracker::new(shared.clone(), 1_000);
        let library = Arc::new(StubLibrary::new(listing));
        (
            AlbumManager::new(library.clone(), shared, quota),
            library,
            temp,
        )
    }

    #[tokio::test]
    async fn test_policy_skip_existing() {
        let (mut mgr, library, _temp) = manager(vec![Album {
            id: "a1".into(),
            title: "trip".into(),
        }])
        .await;

        let decision = mgr
            .get_or_create_album("trip", ExistsPolicy::Skip)
            .await
            .unwrap();
        assert_eq!(decision, AlbumDecision::SkippedExisting);
        assert_eq!(decision.id(), None);
        assert_eq!(library.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_policy_merge_existing() {
        let (mut mgr, library, _temp) = manager(vec![Album {
            id: "a1".into(),
            title: "trip".into(),
        }])
        .await;

        let decision = mgr
            .get_or_create_album("trip", ExistsPolicy::Merge)
            .await
            .unwrap();
        assert_eq!(decision, AlbumDecision::Existing { id: "a1".into() });
        assert_eq!(library.creates.load(Ordering::SeqCst), 0);

        // MERGE records the adopted album in state.
        let state = mgr.state.lock().await;
        assert_eq!(state.album_id("trip"), Some("a1".to_string()));
    }

    #[tokio::test]
    async fn test_policy_stop_existing() {
        let (mut mgr, library, _temp) = manager(vec![Album {
            id: "a1".into(),
            title: "trip".into(),
        }])
        .await;

        let result = mgr.get_or_create_album("trip", ExistsPolicy::Stop).await;
        assert!(matches!(result, Err(AlbumError::AlreadyExists { .. })));
        assert_eq!(library.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_album_is_created_once() {
        let (mut mgr, library, _temp) = manager(Vec::new()).await;

        let decision = mgr
            .get_or_create_album("trip", ExistsPolicy::Stop)
            .await
            .unwrap();
        assert!(matches!(decision, AlbumDecision::Created { .. }));
        assert_eq!(library.creates.load(Ordering::SeqCst), 1);

        // Second resolution finds it in state; no second create.
        let decision = mgr
            .get_or_create_album("trip", ExistsPolicy::Merge)
            .await
            .unwrap();
        assert!(matches!(decision, AlbumDecision::Existing { .. }));
        assert_eq!(library.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_map_wins_over_cache() {
        let (mut mgr, _library, _temp) = manager(Vec::new()).await;
        {
            let mut state = mgr.state.lock().await;
            state.add_created_album("trip", "from-state");
        }
        // Cache never gets loaded: the state answer short-circuits.
        let id = mgr.album_exists("trip").await.unwrap();
        assert_eq!(id, Some("from-state".to_string()));
        assert!(!mgr.cache_mut().is_loaded());
    }

    #[tokio::test]
    async fn test_add_media_empty_input_is_noop() {
        let (mut mgr, _library, _temp) = manager(Vec::new()).await;
        mgr.add_media_to_album("a1", &[]).await.unwrap();

        // No request was recorded for the no-op.
        let status = mgr.quota.status().await;
        assert_eq!(status.session.used, 0);
    }

    #[tokio::test]
    async fn test_add_media_partial_failure_still_succeeds() {
        let (mut mgr, _library, _temp) = manager(Vec::new()).await;
        let ids = vec!["m1".to_string(), "fail-m2".to_string()];
        // One of two items failed: logged, but the call is not an error.
        mgr.add_media_to_album("a1", &ids).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_media_zero_successes_is_error() {
        let (mut mgr, _library, _temp) = manager(Vec::new()).await;
        let ids = vec!["fail-m1".to_string(), "fail-m2".to_string()];
        let result = mgr.add_media_to_album("a1", &ids).await;
        assert!(matches!(result, Err(AlbumError::NothingAdded { .. })));
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let (mut mgr, _library, _temp) = manager(Vec::new()).await;
        let result = mgr.get_or_create_album("<>:", ExistsPolicy::Merge).await;
        assert!(matches!(result, Err(AlbumError::InvalidName { .. })));
    }
}
