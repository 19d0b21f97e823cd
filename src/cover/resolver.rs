//! Cover art resolver.
//!
//! Picks the image a synced file offers as its album's cover:
//! 1. Embedded in the synced file's tags
//! 2. Sidecar file in the same directory (cached scan)
//!
//! The image is stored before the album row is written, so no file work
//! happens while the database write lock is held. The caller decides
//! whether the album takes it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CoverConfig;
use crate::error::Result;
use crate::metadata::EmbeddedCover;

use super::cache::{self, MemoryScanCache, ScanCache};
use super::sidecar::{self, DirectoryLister, FsLister};
use super::store::{CoverStore, StoredCover};

/// Where a resolved cover came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverSource {
    /// Embedded in the audio file's tags
    Embedded,
    /// Copied from a sidecar file (folder.jpg, cover.png, ...)
    Sidecar(PathBuf),
}

/// A cover written to the store, ready to be recorded on an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCover {
    pub stored: StoredCover,
    pub source: CoverSource,
}

/// Cover resolver shared by all sync workers.
#[derive(Clone)]
pub struct CoverResolver {
    store: CoverStore,
    lister: Arc<dyn DirectoryLister>,
    cache: Arc<dyn ScanCache>,
    ttl: Duration,
}

impl CoverResolver {
    /// Resolver over the real filesystem with an in-memory scan cache.
    pub fn new(store_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::with_parts(
            CoverStore::new(store_dir),
            Arc::new(FsLister),
            Arc::new(MemoryScanCache::new()),
            ttl,
        )
    }

    pub fn from_config(config: &CoverConfig) -> Self {
        Self::new(config.store_dir(), config.scan_cache_ttl())
    }

    /// Resolver with explicit collaborators.
    pub fn with_parts(
        store: CoverStore,
        lister: Arc<dyn DirectoryLister>,
        cache: Arc<dyn ScanCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            lister,
            cache,
            ttl,
        }
    }

    pub fn store(&self) -> &CoverStore {
        &self.store
    }

    /// Store the cover `audio_path` offers, embedded art first.
    ///
    /// Blocking: lists the directory, sniffs the sidecar and writes the
    /// store. If no album records the result, the caller removes it again
    /// when [`StoredCover::created`] is set.
    pub fn prepare(
        &self,
        embedded: Option<&EmbeddedCover>,
        audio_path: &Path,
    ) -> Result<Option<ResolvedCover>> {
        if let Some(cover) = embedded.filter(|c| !c.data.is_empty()) {
            let stored = self.store.write(&cover.data, cover.extension())?;
            tracing::debug!(target: "cover", file = %stored.file_name, "Embedded cover");
            return Ok(Some(ResolvedCover {
                stored,
                source: CoverSource::Embedded,
            }));
        }

        let Some(sidecar) = self.sidecar_for(audio_path) else {
            return Ok(None);
        };
        let stored = self.store.copy_from(&sidecar)?;
        tracing::debug!(target: "cover", sidecar = %sidecar.display(), file = %stored.file_name, "Sidecar cover");
        Ok(Some(ResolvedCover {
            stored,
            source: CoverSource::Sidecar(sidecar),
        }))
    }

    /// Sidecar cover for the directory containing `audio_path`, cached.
    pub fn sidecar_for(&self, audio_path: &Path) -> Option<PathBuf> {
        let dir = audio_path.parent()?;
        let key = cache::scan_key(dir);
        cache::remember(&*self.cache, &key, self.ttl, || {
            sidecar::find_sidecar_cover(&*self.lister, dir)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_png;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    struct CountingLister {
        calls: AtomicUsize,
    }

    impl DirectoryLister for CountingLister {
        fn files(&self, dir: &Path) -> Vec<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FsLister.files(dir)
        }
    }

    fn embedded(mime: &str) -> EmbeddedCover {
        EmbeddedCover {
            data: b"embedded image".to_vec(),
            mime_type: mime.into(),
        }
    }

    #[test]
    fn test_embedded_cover_preferred() {
        let temp = TempDir::new().unwrap();
        write_png(&temp.path().join("cover.png"));
        let resolver = CoverResolver::new(temp.path().join("store"), DAY);

        let resolved = resolver
            .prepare(Some(&embedded("image/jpeg")), &temp.path().join("a.mp3"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.source, CoverSource::Embedded);
        assert!(resolved.stored.file_name.ends_with(".jpeg"));
    }

    #[test]
    fn test_embedded_unknown_mime_defaults_to_png() {
        let temp = TempDir::new().unwrap();
        let resolver = CoverResolver::new(temp.path().join("store"), DAY);

        let resolved = resolver
            .prepare(Some(&embedded("")), &temp.path().join("a.mp3"))
            .unwrap()
            .unwrap();
        assert!(resolved.stored.file_name.ends_with(".png"));
    }

    #[test]
    fn test_sidecar_used_without_embedded() {
        let temp = TempDir::new().unwrap();
        write_png(&temp.path().join("Folder.png"));
        let resolver = CoverResolver::new(temp.path().join("store"), DAY);

        let resolved = resolver
            .prepare(None, &temp.path().join("a.mp3"))
            .unwrap()
            .unwrap();
        assert_eq!(
            resolved.source,
            CoverSource::Sidecar(temp.path().join("Folder.png"))
        );
        assert!(resolved.stored.path.exists());
    }

    #[test]
    fn test_same_sidecar_is_stored_once() {
        let temp = TempDir::new().unwrap();
        write_png(&temp.path().join("cover.png"));
        let resolver = CoverResolver::new(temp.path().join("store"), DAY);

        let first = resolver.prepare(None, &temp.path().join("01.mp3")).unwrap().unwrap();
        let second = resolver.prepare(None, &temp.path().join("02.mp3")).unwrap().unwrap();
        assert!(first.stored.created);
        assert!(!second.stored.created);
        assert_eq!(first.stored.file_name, second.stored.file_name);
    }

    #[test]
    fn test_no_cover_anywhere() {
        let temp = TempDir::new().unwrap();
        let resolver = CoverResolver::new(temp.path().join("store"), DAY);
        let result = resolver
            .prepare(None, &temp.path().join("a.mp3"))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_directory_scan_is_cached() {
        let temp = TempDir::new().unwrap();
        let lister = Arc::new(CountingLister {
            calls: AtomicUsize::new(0),
        });
        let resolver = CoverResolver::with_parts(
            CoverStore::new(temp.path().join("store")),
            lister.clone(),
            Arc::new(MemoryScanCache::new()),
            DAY,
        );

        assert_eq!(resolver.sidecar_for(&temp.path().join("01.mp3")), None);
        // A cover added later is not seen until the entry expires
        write_png(&temp.path().join("cover.png"));
        assert_eq!(resolver.sidecar_for(&temp.path().join("02.mp3")), None);
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }
}
