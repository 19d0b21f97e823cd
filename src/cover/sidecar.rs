//! Detect sidecar cover art files next to audio files.
//!
//! Only the audio file's own directory is searched (no recursion). A name
//! matches when it ends in `cover` or `folder` with a `jpg`, `jpeg` or `png`
//! extension, case-insensitively. The first match in sorted listing order
//! wins, and it must decode as an image.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static COVER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(cov|fold)er\.(jpe?g|png)$").expect("valid regex"));

/// Lists the regular files of a directory.
pub trait DirectoryLister: Send + Sync {
    /// Files directly inside `dir`, in a stable order. Errors yield an empty list.
    fn files(&self, dir: &Path) -> Vec<PathBuf>;
}

/// [`DirectoryLister`] over the real filesystem. Symlinks are followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLister;

impl DirectoryLister for FsLister {
    fn files(&self, dir: &Path) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(target: "cover", dir = %dir.display(), error = %e, "Unreadable directory");
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            // Path::is_file follows symlinks
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    }
}

/// Whether `file_name` looks like a sidecar cover.
pub fn is_cover_name(file_name: &str) -> bool {
    COVER_NAME.is_match(file_name)
}

/// Find the sidecar cover for files in `dir`.
///
/// Only the first name match is considered; if it is not a readable image the
/// directory has no cover.
pub fn find_sidecar_cover(lister: &dyn DirectoryLister, dir: &Path) -> Option<PathBuf> {
    let candidate = lister.files(dir).into_iter().find(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_cover_name)
    })?;

    if is_image(&candidate) {
        Some(candidate)
    } else {
        tracing::debug!(target: "cover", path = %candidate.display(), "Sidecar cover is not an image, ignoring");
        None
    }
}

fn is_image(path: &Path) -> bool {
    image::image_dimensions(path).is_ok()
}
