//! Shared test support: an in-memory photo library implementation.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use shoebox::error::RemoteError;
use shoebox::remote::{Album, AlbumPage, ItemResult, MediaItem, PhotoLibrary, UploadToken};

/// In-memory photo library that records every mutation, standing in for the
/// remote service in end-to-end tests.
#[derive(Default)]
pub struct FakeLibrary {
    /// Albums visible to the listing endpoint, title -> id.
    pub remote_albums: Mutex<HashMap<String, String>>,
    pub create_album_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    counter: AtomicUsize,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_albums(titles: &[(&str, &str)]) -> Self {
        let library = Self::default();
        {
            let mut albums = library.remote_albums.lock().unwrap();
            for (title, id) in titles {
                albums.insert(title.to_string(), id.to_string());
            }
        }
        library
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl PhotoLibrary for FakeLibrary {
    async fn list_albums(&self, _page_token: Option<&str>) -> Result<AlbumPage, RemoteError> {
        let albums = self.remote_albums.lock().unwrap();
        Ok(AlbumPage {
            albums: albums
                .iter()
                .map(|(title, id)| Album {
                    id: id.clone(),
                    title: title.clone(),
                })
                .collect(),
            next_page_token: None,
        })
    }

    async fn create_album(&self, title: &str) -> Result<Album, RemoteError> {
        self.create_album_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id("album");
        self.remote_albums
            .lock()
            .unwrap()
            .insert(title.to_string(), id.clone());
        Ok(Album {
            id,
            title: title.to_string(),
        })
    }

    async fn add_to_album(
        &self,
        _album_id: &str,
        media_item_ids: &[String],
    ) -> Result<Vec<ItemResult>, RemoteError> {
        Ok(media_item_ids
            .iter()
            .map(|id| ItemResult {
                status_code: Some(0),
                status_message: None,
                media_item: Some(MediaItem { id: id.clone() }),
            })
            .collect())
    }

    async fn upload_bytes(&self, file: &Path) -> Result<UploadToken, RemoteError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        Ok(UploadToken(format!("token-{}", file.display())))
    }

    async fn create_media_item(
        &self,
        _token: &UploadToken,
        _file_name: &str,
        _album_id: Option<&str>,
    ) -> Result<ItemResult, RemoteError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ItemResult {
            status_code: Some(0),
            status_message: None,
            media_item: Some(MediaItem {
                id: self.next_id("media"),
            }),
        })
    }

    async fn refresh_auth(&self) -> Result<(), RemoteError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Create a file with content, creating parent directories as needed.
pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}
