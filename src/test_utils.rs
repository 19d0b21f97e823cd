//! Test utilities and fixtures for music-sync tests.
//!
//! This module provides common test helpers, mock factories, and
//! database utilities to reduce boilerplate in tests.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_db, MockReader, mock_tag_set};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let reader = MockReader::default();
//!     reader.set(path, Ok(mock_tag_set()));
//!     // ... test logic
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::metadata::{BadFile, MetadataReader, TagSet};
use crate::model::Song;
use crate::sync::TrackIdentity;

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically.
///
/// ```ignore
/// let (pool, _dir) = temp_db().await;
/// // Database is deleted when _dir goes out of scope
/// ```
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = crate::db::db_url(Some(db_path.as_path()));

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Tag set of an untagged three-minute file.
///
/// Customize with struct update syntax:
///
/// ```ignore
/// let tags = TagSet { artist: "A".into(), ..mock_tag_set() };
/// ```
pub fn mock_tag_set() -> TagSet {
    TagSet {
        artist: String::new(),
        album_artist: String::new(),
        album: String::new(),
        title: String::new(),
        track: 0,
        disc: 1,
        year: None,
        genre: String::new(),
        lyrics: String::new(),
        compilation: false,
        cover: None,
        length: 180.0,
        path: PathBuf::new(),
        mtime: 0,
    }
}

/// Song row for `path` on the given artist and album.
pub fn mock_song(path: &str, artist_id: i64, album_id: i64) -> Song {
    Song {
        id: TrackIdentity::of(Path::new(path)).as_str().to_string(),
        album_id,
        artist_id,
        title: "Test Song".to_string(),
        length: 180.0,
        track: 1,
        disc: 1,
        year: Some(2023),
        genre: String::new(),
        lyrics: String::new(),
        path: path.to_string(),
        mtime: 1_700_000_000,
        storage: "local".to_string(),
    }
}

/// [`MetadataReader`] answering from a table of canned results.
///
/// Unknown paths read as bad files.
#[derive(Default)]
pub struct MockReader {
    files: Mutex<HashMap<PathBuf, Result<TagSet, BadFile>>>,
}

impl MockReader {
    pub fn set(&self, path: &Path, result: Result<TagSet, BadFile>) {
        self.files.lock().insert(path.to_path_buf(), result);
    }
}

impl MetadataReader for MockReader {
    fn read(&self, path: &Path, mtime: i64) -> Result<TagSet, BadFile> {
        let canned = self
            .files
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_else(|| Err(BadFile::new("Unsupported file")));
        canned.map(|tags| TagSet {
            path: path.to_path_buf(),
            mtime,
            ..tags
        })
    }
}

/// Create (or overwrite) a small placeholder file, creating parent directories.
pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    std::fs::write(path, b"not really audio").expect("Failed to write file");
}

/// Write a tiny valid PNG.
pub fn write_png(path: &Path) {
    image::RgbImage::new(2, 2)
        .save(path)
        .expect("Failed to write png");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;
        assert_eq!(crate::db::count_songs(&pool).await.unwrap(), 0);
    }

    #[test]
    fn test_mock_reader() {
        let reader = MockReader::default();
        let path = Path::new("/music/a.mp3");
        reader.set(path, Ok(mock_tag_set()));

        let tags = reader.read(path, 42).unwrap();
        assert_eq!(tags.path, path);
        assert_eq!(tags.mtime, 42);
        assert!(reader.read(Path::new("/music/b.mp3"), 0).is_err());
    }

    #[test]
    fn test_mock_song_identity_matches_path() {
        let song = mock_song("/music/song.flac", 1, 1);
        assert_eq!(song.id, TrackIdentity::of(Path::new("/music/song.flac")).as_str());
    }
}
