//! HTTP implementation of the photo-library service.
//!
//! Talks to the Google Photos Library API. Raw bytes go to the uploads
//! endpoint with the `X-Goog-Upload-*` headers; everything else is JSON.
//! Error mapping is mechanical (429 → rate limited, 401 → auth expired,
//! 409 → conflict, 403 → permission denied); retry policy belongs to the
//! callers, not this layer.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::ALBUM_LIST_PAGE_SIZE;
use crate::error::{AuthSnafu, FileReadSnafu, RemoteError, TransportSnafu};
use crate::media;

use super::{Album, AlbumPage, ItemResult, MediaItem, PhotoLibrary, TokenManager, UploadToken};

const DEFAULT_BASE_URL: &str = "https://photoslibrary.googleapis.com";

/// Production photo-library client.
pub struct HttpPhotoLibrary {
    http: reqwest::Client,
    base_url: String,
    auth: TokenManager,
}

impl HttpPhotoLibrary {
    pub fn new(auth: TokenManager) -> Self {
        Self::with_base_url(auth, DEFAULT_BASE_URL)
    }

    /// Client against a non-default endpoint (used by tests).
    pub fn with_base_url(auth: TokenManager, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn bearer(&self) -> Result<String, RemoteError> {
        self.auth.bearer().await.context(AuthSnafu)
    }

    /// Map a non-success response into the error taxonomy.
    async fn status_error(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        match status.as_u16() {
            429 => RemoteError::RateLimited,
            401 => RemoteError::AuthExpired { message },
            403 => RemoteError::PermissionDenied,
            409 => RemoteError::Conflict,
            code => RemoteError::Status { code, message },
        }
    }
}

// ============ Wire DTOs ============

#[derive(Debug, Deserialize)]
struct AlbumDto {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAlbumsResponse {
    #[serde(default)]
    albums: Vec<AlbumDto>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateAlbumRequest<'a> {
    album: CreateAlbumBody<'a>,
}

#[derive(Debug, Serialize)]
struct CreateAlbumBody<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddMediaRequest<'a> {
    media_item_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleMediaItem<'a> {
    upload_token: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItem<'a> {
    description: &'a str,
    simple_media_item: SimpleMediaItem<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateRequest<'a> {
    new_media_items: Vec<NewMediaItem<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album_id: Option<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StatusDto {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemDto {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemResultDto {
    #[serde(default)]
    status: StatusDto,
    media_item: Option<MediaItemDto>,
}

impl From<ItemResultDto> for ItemResult {
    fn from(dto: ItemResultDto) -> Self {
        ItemResult {
            status_code: dto.status.code,
            status_message: dto.status.message,
            media_item: dto.media_item.map(|m| MediaItem { id: m.id }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResponse {
    #[serde(default)]
    new_media_item_results: Vec<ItemResultDto>,
}

#[async_trait]
impl PhotoLibrary for HttpPhotoLibrary {
    async fn list_albums(&self, page_token: Option<&str>) -> Result<AlbumPage, RemoteError> {
        let bearer = self.bearer().await?;
        let mut request = self
            .http
            .get(format!("{}/v1/albums", self.base_url))
            .bearer_auth(bearer)
            .query(&[("pageSize", ALBUM_LIST_PAGE_SIZE.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.context(TransportSnafu)?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let parsed: ListAlbumsResponse = response.json().await.context(TransportSnafu)?;
        let albums = parsed
            .albums
            .into_iter()
            .filter(|a| !a.id.is_empty() && !a.title.is_empty())
            .map(|a| Album {
                id: a.id,
                title: a.title,
            })
            .collect();
        Ok(AlbumPage {
            albums,
            next_page_token: parsed.next_page_token,
        })
    }

    async fn create_album(&self, title: &str) -> Result<Album, RemoteError> {
        let bearer = self.bearer().await?;
        let response = self
            .http
            .post(format!("{}/v1/albums", self.base_url))
            .bearer_auth(bearer)
            .json(&CreateAlbumRequest {
                album: CreateAlbumBody { title },
            })
            .send()
            .await
            .context(TransportSnafu)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let created: AlbumDto = response.json().await.context(TransportSnafu)?;
        if created.id.is_empty() {
            return Err(RemoteError::Malformed {
                message: "create album response carried no id".to_string(),
            });
        }
        Ok(Album {
            id: created.id,
            title: created.title,
        })
    }

    async fn add_to_album(
        &self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> Result<Vec<ItemResult>, RemoteError> {
        let bearer = self.bearer().await?;
        let response = self
            .http
            .post(format!(
                "{}/v1/albums/{album_id}:batchAddMediaItems",
                self.base_url
            ))
            .bearer_auth(bearer)
            .json(&AddMediaRequest {
                media_item_ids,
            })
            .send()
            .await
            .context(TransportSnafu)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let parsed: BatchResponse = response.json().await.unwrap_or(BatchResponse {
            new_media_item_results: Vec::new(),
        });
        Ok(parsed
            .new_media_item_results
            .into_iter()
            .map(ItemResult::from)
            .collect())
    }

    async fn upload_bytes(&self, file: &Path) -> Result<UploadToken, RemoteError> {
        let bearer = self.bearer().await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let handle = tokio::fs::File::open(file).await.context(FileReadSnafu)?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));

        debug!(file = %file.display(), "Transferring file bytes");

        let response = self
            .http
            .post(format!("{}/v1/uploads", self.base_url))
            .bearer_auth(bearer)
            .header("Content-Type", "application/octet-stream")
            // Header values must stay ASCII; the filename is percent-encoded.
            .header(
                "X-Goog-Upload-File-Name",
                urlencoding::encode(&file_name).into_owned(),
            )
            .header("X-Goog-Upload-Content-Type", media::mime_type(file))
            .header("X-Goog-Upload-Protocol", "raw")
            .body(body)
            .send()
            .await
            .context(TransportSnafu)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let token = response.text().await.context(TransportSnafu)?;
        if token.is_empty() {
            return Err(RemoteError::Malformed {
                message: "upload endpoint returned an empty token".to_string(),
            });
        }
        Ok(UploadToken(token))
    }

    async fn create_media_item(
        &self,
        token: &UploadToken,
        file_name: &str,
        album_id: Option<&str>,
    ) -> Result<ItemResult, RemoteError> {
        let bearer = self.bearer().await?;
        let request = BatchCreateRequest {
            new_media_items: vec![NewMediaItem {
                description: file_name,
                simple_media_item: SimpleMediaItem {
                    upload_token: &token.0,
                    file_name,
                },
            }],
            album_id,
        };

        let response = self
            .http
            .post(format!("{}/v1/mediaItems:batchCreate", self.base_url))
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await
            .context(TransportSnafu)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let parsed: BatchResponse = response.json().await.context(TransportSnafu)?;
        parsed
            .new_media_item_results
            .into_iter()
            .next()
            .map(ItemResult::from)
            .ok_or_else(|| RemoteError::Malformed {
                message: "batch create response carried no results".to_string(),
            })
    }

    async fn refresh_auth(&self) -> Result<(), RemoteError> {
        self.auth.refresh().await.context(AuthSnafu)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_create_request_shape() {
        let token = UploadToken("tok".to_string());
        let request = BatchCreateRequest {
            new_media_items: vec![NewMediaItem {
                description: "a.jpg",
                simple_media_item: SimpleMediaItem {
                    upload_token: &token.0,
                    file_name: "a.jpg",
                },
            }],
            album_id: Some("album-1"),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["albumId"], "album-1");
        assert_eq!(
            json["newMediaItems"][0]["simpleMediaItem"]["uploadToken"],
            "tok"
        );
        assert_eq!(json["newMediaItems"][0]["simpleMediaItem"]["fileName"], "a.jpg");
    }

    #[test]
    fn test_batch_create_request_omits_absent_album() {
        let token = UploadToken("tok".to_string());
        let request = BatchCreateRequest {
            new_media_items: vec![NewMediaItem {
                description: "a.jpg",
                simple_media_item: SimpleMediaItem {
                    upload_token: &token.0,
                    file_name: "a.jpg",
                },
            }],
            album_id: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("albumId").is_none());
    }

    #[test]
    fn test_batch_response_parsing_tolerates_sparse_status() {
        let raw = r#"{
            "newMediaItemResults": [
                {"mediaItem": {"id": "m1"}},
                {"status": {"code": 0}},
                {"status": {"message": "Success"}},
                {"status": {"code": 8, "message": "Quota exceeded"}}
            ]
        }"#;
        let parsed: BatchResponse = serde_json::from_str(raw).unwrap();
        let results: Vec<ItemResult> = parsed
            .new_media_item_results
            .into_iter()
            .map(ItemResult::from)
            .collect();
        assert!(results[0].succeeded());
        assert!(results[1].succeeded());
        assert!(results[2].succeeded());
        assert!(!results[3].succeeded());
    }

    #[test]
    fn test_list_albums_response_parsing() {
        let raw = r#"{
            "albums": [
                {"id": "a1", "title": "2023-trip"},
                {"id": "", "title": "ignored"}
            ],
            "nextPageToken": "page-2"
        }"#;
        let parsed: ListAlbumsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.albums.len(), 2);
        assert_eq!(parsed.next_page_token.as_deref(), Some("page-2"));
    }
}
