//! Core data models for the music library.
//!
//! Defines the primary entities: [`Song`], [`Artist`], and [`Album`].
//! These are derived from SQLx for database mapping.
//!
//! # Database Schema
//!
//! - `artists` - unique by name; ids 1 and 2 are the reserved
//!   "Unknown Artist" and "Various Artists" rows
//! - `albums` - unique by (artist, name, compilation flag)
//! - `songs` - keyed by the [`TrackIdentity`](crate::sync::TrackIdentity) of the file path

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sqlx::FromRow;

/// Id of the reserved artist used when a file carries no artist tag.
pub const UNKNOWN_ARTIST_ID: i64 = 1;
/// Name of the reserved unknown artist.
pub const UNKNOWN_ARTIST_NAME: &str = "Unknown Artist";
/// Id of the reserved artist that owns compilation albums.
pub const VARIOUS_ARTIST_ID: i64 = 2;
/// Name of the reserved compilation artist.
pub const VARIOUS_ARTIST_NAME: &str = "Various Artists";
/// Album name used when a file carries no album tag.
pub const UNKNOWN_ALBUM_NAME: &str = "Unknown Album";

/// An artist in the music library.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Artist {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Artist name (unique)
    pub name: String,
}

impl Artist {
    /// Whether this is the reserved "Unknown Artist".
    pub fn is_unknown(&self) -> bool {
        self.id == UNKNOWN_ARTIST_ID
    }

    /// Whether this is the reserved "Various Artists".
    pub fn is_various(&self) -> bool {
        self.id == VARIOUS_ARTIST_ID
    }

    /// Sentinel artists are left out of search indexing.
    pub fn is_searchable(&self) -> bool {
        !self.is_unknown() && !self.is_various()
    }
}

/// An album in the music library.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Album {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Owning artist (Various Artists for compilations)
    pub artist_id: i64,
    /// Album title
    pub name: String,
    /// Compilation flag, part of the natural key
    pub is_compilation: bool,
    /// File name of the stored cover image, empty when none
    pub cover: String,
}

impl Album {
    pub fn has_cover(&self) -> bool {
        !self.cover.is_empty()
    }
}

/// A song (audio file) in the music library.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Song {
    /// Path identity (hex SHA-256 of the file path)
    pub id: String,
    pub album_id: i64,
    pub artist_id: i64,
    /// Track title, may be empty (see [`Song::display_title`])
    pub title: String,
    /// Duration in seconds
    pub length: f64,
    pub track: i64,
    pub disc: i64,
    pub year: Option<i64>,
    pub genre: String,
    /// Lyrics, already normalized by [`normalize_lyrics`]
    pub lyrics: String,
    /// Path as seen by the scanner (or a storage URL, see [`crate::storage`])
    pub path: String,
    /// Modification time in seconds since the Unix epoch
    pub mtime: i64,
    /// Storage backend tag (`local`, `s3`, `s3-legacy`, `dropbox`)
    pub storage: String,
}

impl Song {
    /// Title for display: falls back to the file stem when no title is stored.
    pub fn display_title(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        Path::new(&self.path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Parsed storage location of this song.
    pub fn storage_metadata(&self) -> crate::storage::StorageMetadata {
        crate::storage::StorageMetadata::from_song(&self.storage, &self.path)
    }
}

static BREAK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static LRC_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\[\d{2}:\d{2}.\d{2}\]\s*").expect("valid regex"));

/// Normalize lyrics for plain-text display.
///
/// HTML line breaks become newlines, remaining markup is stripped, and
/// synchronized-lyrics timestamps like `[02:15.30]` are removed.
pub fn normalize_lyrics(raw: &str) -> String {
    let with_newlines = BREAK_TAG.replace_all(raw, "\n");
    let stripped = MARKUP.replace_all(&with_newlines, "");
    LRC_TIMESTAMP.replace_all(&stripped, "").into_owned()
}
