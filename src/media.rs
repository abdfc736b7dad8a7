//! Media file classification and size ceilings.
//!
//! The remote service enforces independent size limits for photos and videos;
//! anything outside the supported extension sets is skipped, never uploaded.

use std::path::Path;

/// Maximum accepted photo size (200 MB).
pub const MAX_PHOTO_SIZE: u64 = 200 * 1024 * 1024;

/// Maximum accepted video size (10 GB).
pub const MAX_VIDEO_SIZE: u64 = 10 * 1024 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "heic", "heif", "webp"];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "m4v", "webm", "3gp"];

/// Supported media categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Size ceiling for this category.
    pub fn max_size(self) -> u64 {
        match self {
            MediaKind::Image => MAX_PHOTO_SIZE,
            MediaKind::Video => MAX_VIDEO_SIZE,
        }
    }
}

/// Classify a path by its extension. Returns `None` for unsupported formats.
pub fn classify(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Whether the path has a supported media extension.
pub fn is_supported(path: &Path) -> bool {
    classify(path).is_some()
}

/// MIME type for a supported media file, falling back to octet-stream.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "m4v" => "video/x-m4v",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        _ => "application/octet-stream",
    }
}

/// Format a byte count for log output (e.g. "14.2MB").
pub fn format_size(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1}TB")
}
