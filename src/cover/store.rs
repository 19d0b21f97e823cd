//! On-disk store for album cover images.
//!
//! Covers are written under a single directory with content-derived names,
//! so writing the same image twice produces the same file. A file that
//! already exists is never rewritten, and [`StoredCover::created`] tells
//! whether this write produced it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result, ResultExt};

/// A cover image that was written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCover {
    /// File name recorded on the album row
    pub file_name: String,
    pub path: PathBuf,
    /// False when an identical image was already in the store
    pub created: bool,
}

/// Cover image directory.
#[derive(Debug, Clone)]
pub struct CoverStore {
    dir: PathBuf,
}

impl CoverStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write raw image bytes with the given extension.
    pub fn write(&self, data: &[u8], extension: &str) -> Result<StoredCover> {
        let file_name = format!("{}.{}", content_name(data), extension.to_ascii_lowercase());
        self.ensure_dir()?;
        let path = self.dir.join(&file_name);

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::trace!(target: "cover", file = %file_name, "Cover already stored");
                return Ok(StoredCover {
                    file_name,
                    path,
                    created: false,
                });
            }
            Err(e) => return Err(Error::Io(e).context(format!("creating cover {}", path.display()))),
        };
        if let Err(e) = file.write_all(data) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(Error::Io(e).context(format!("writing cover {}", path.display())));
        }

        tracing::debug!(target: "cover", file = %file_name, bytes = data.len(), "Stored cover");
        Ok(StoredCover {
            file_name,
            path,
            created: true,
        })
    }

    /// Copy an image file into the store, keeping its extension.
    pub fn copy_from(&self, source: &Path) -> Result<StoredCover> {
        let data = fs::read(source).with_context(format!("reading cover {}", source.display()))?;
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_string();
        self.write(&data, &extension)
    }

    /// Best-effort removal of a cover no album ended up using.
    pub fn remove(&self, cover: &StoredCover) {
        if let Err(e) = fs::remove_file(&cover.path) {
            tracing::warn!(target: "cover", path = %cover.path.display(), error = %e, "Failed to remove cover");
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(format!("creating {}", self.dir.display()))
    }
}

fn content_name(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    // 32 hex chars is plenty to avoid collisions in one library
    format!("{:x}", digest)[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_is_content_addressed() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path().join("covers"));

        let a = store.write(b"image bytes", "JPEG").unwrap();
        let b = store.write(b"image bytes", "jpeg").unwrap();
        let c = store.write(b"other bytes", "jpeg").unwrap();

        assert_eq!(a.file_name, b.file_name);
        assert!(a.created);
        assert!(!b.created);
        assert_ne!(a.file_name, c.file_name);
        assert!(a.file_name.ends_with(".jpeg"));
        assert_eq!(std::fs::read(&a.path).unwrap(), b"image bytes");
    }

    #[test]
    fn test_copy_keeps_extension() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("Folder.PNG");
        std::fs::write(&source, b"png bytes").unwrap();

        let store = CoverStore::new(temp.path().join("covers"));
        let stored = store.copy_from(&source).unwrap();
        assert!(stored.file_name.ends_with(".png"));
        assert!(stored.path.starts_with(store.dir()));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path());
        let stored = store.write(b"x", "png").unwrap();

        store.remove(&stored);
        assert!(!stored.path.exists());
        // Second removal only logs
        store.remove(&stored);
    }

    #[test]
    fn test_existing_cover_is_not_rewritten() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path());
        let first = store.write(b"x", "png").unwrap();
        let modified = std::fs::metadata(&first.path).unwrap().modified().unwrap();

        let second = store.write(b"x", "PNG").unwrap();
        assert!(!second.created);
        assert_eq!(second.path, first.path);
        assert_eq!(std::fs::metadata(&first.path).unwrap().modified().unwrap(), modified);
    }

    #[test]
    fn test_copy_missing_source_is_error() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path());
        assert!(store.copy_from(&temp.path().join("nope.jpg")).is_err());
    }
}
