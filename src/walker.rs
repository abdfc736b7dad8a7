//! Directory discovery and album naming.
//!
//! Walks the target tree looking for directories that directly contain
//! supported media files, pruning system and hidden directories. Directories
//! are processed deepest-first so leaf albums fill before their parents.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::media;
use crate::quota;

/// Directory names that are never backed up (OS and NAS system folders,
/// thumbnail caches, trash).
const SKIP_DIRECTORIES: &[&str] = &[
    ".aux",
    ".tmp",
    ".temp",
    "$recycle.bin",
    "system volume information",
    ".trashes",
    ".ds_store",
    "thumbs.db",
    "@eadir",
    ".@__thumb",
    ".picasa",
    ".picasaoriginals",
];

/// How album names are derived from directory paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlbumNaming {
    /// Path relative to the base directory, separators replaced with dashes:
    /// `pics/south-america/brazil` → "south-america-brazil".
    #[default]
    Relative,
    /// Relative path prefixed with the base directory name:
    /// `pics/south-america/brazil` → "pics-south-america-brazil".
    Full,
    /// Leaf directory name only: `pics/south-america/brazil` → "brazil".
    Leaf,
}

/// Whether a directory is skipped by the system-directory rules.
pub fn should_skip_directory(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lowered = name.to_ascii_lowercase();

    if SKIP_DIRECTORIES.contains(&lowered.as_str()) {
        return true;
    }
    // Hidden directories, Windows system attributes, NAS metadata prefixes.
    if lowered.len() > 1 && lowered.starts_with('.') {
        return true;
    }
    lowered.starts_with('$') || lowered.starts_with('@')
}

/// Count (total, supported) files directly inside a directory.
pub fn directory_media_count(directory: &Path) -> (usize, usize) {
    let mut total = 0;
    let mut supported = 0;

    let Ok(entries) = std::fs::read_dir(directory) else {
        return (0, 0);
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            total += 1;
            if media::is_supported(&path) {
                supported += 1;
            }
        }
    }
    (total, supported)
}

/// All regular files directly inside a directory, sorted by name.
pub fn list_files(directory: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(directory) else {
        warn!(directory = %directory.display(), "Cannot read directory");
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// All directories under `base` (inclusive) that directly contain supported
/// media, deepest first. Also returns the number of pruned system
/// directories.
pub fn media_directories(base: &Path) -> (Vec<PathBuf>, usize) {
    let mut found = Vec::new();
    let mut skipped = 0;
    walk(base, true, &mut found, &mut skipped);

    // Deepest first, then lexicographic for a stable order.
    found.sort_by(|a, b| {
        let depth = |p: &PathBuf| p.components().count();
        depth(b).cmp(&depth(a)).then_with(|| a.cmp(b))
    });

    if skipped > 0 {
        info!(skipped, "Skipped system/hidden directories");
    }
    (found, skipped)
}

fn walk(directory: &Path, is_root: bool, found: &mut Vec<PathBuf>, skipped: &mut usize) {
    if !is_root && should_skip_directory(directory) {
        *skipped += 1;
        return;
    }

    let (_, supported) = directory_media_count(directory);
    if supported > 0 {
        found.push(directory.to_path_buf());
    }

    let Ok(entries) = std::fs::read_dir(directory) else {
        warn!(directory = %directory.display(), "Cannot read directory");
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, false, found, skipped);
        }
    }
}

/// Derive the album name for a directory under the given naming strategy.
pub fn album_name_for(directory: &Path, base: &Path, naming: AlbumNaming) -> String {
    let leaf = |path: &Path| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Root".to_string())
    };

    let relative = directory
        .strip_prefix(base)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty());

    match naming {
        AlbumNaming::Leaf => leaf(directory),
        AlbumNaming::Relative => match relative {
            Some(rel) => join_components(rel),
            None => leaf(base),
        },
        AlbumNaming::Full => {
            let base_name = leaf(base);
            match relative {
                Some(rel) => format!("{base_name}-{}", join_components(rel)),
                None => base_name,
            }
        }
    }
}

fn join_components(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// Estimated size of a full backup of `base`.
#[derive(Debug, Clone, Copy)]
pub struct BackupScope {
    /// Supported files in the tree.
    pub files: u64,
    /// Directories containing supported media.
    pub directories: u64,
    /// Estimated total API requests, including a retry buffer.
    pub estimated_requests: u64,
}

/// Walk the tree and estimate the total work a backup would need.
pub fn estimate_scope(base: &Path) -> BackupScope {
    let (directories, _) = media_directories(base);
    let files: u64 = directories
        .iter()
        .map(|d| directory_media_count(d).1 as u64)
        .sum();
    let dir_count = directories.len() as u64;

    BackupScope {
        files,
        directories: dir_count,
        estimated_requests: quota::estimate_total_requests(files, dir_count, 0),
    }
}
