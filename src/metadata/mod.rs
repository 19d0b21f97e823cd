//! Audio file metadata extraction.
//!
//! Uses the lofty crate for format-independent tag access and flattens
//! whatever tag containers a file carries into a single [`TagSet`].
//!
//! # Resolution rules
//!
//! - The file's primary tag (ID3v2 for MP3, Vorbis comments for FLAC/OGG, ...)
//!   is consulted first; any other containers (ID3v1, APE, ...) are fallbacks.
//! - Track number is looked up under `TrackNumber`, `TRACKNUMBER` and
//!   `TRACK_NUMBER`, in that order; the first non-zero value wins.
//! - Disc defaults to 1, title defaults to the file stem.
//! - Text values are HTML-entity decoded and trimmed.
//! - A file is a compilation when it says so, or when it has an album artist
//!   that differs from the track artist.

use std::path::{Path, PathBuf};

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::{MimeType, PictureType};
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use serde::Serialize;

/// Everything the reconciler needs from one audio file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSet {
    pub artist: String,
    pub album_artist: String,
    pub album: String,
    pub title: String,
    pub track: u32,
    pub disc: u32,
    pub year: Option<i32>,
    pub genre: String,
    pub lyrics: String,
    pub compilation: bool,
    pub cover: Option<EmbeddedCover>,
    /// Duration in seconds
    pub length: f64,
    pub path: PathBuf,
    /// Modification time in seconds since the Unix epoch
    pub mtime: i64,
}

/// Cover image bytes found inside the tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddedCover {
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
    /// MIME type as reported by the tag, possibly empty
    pub mime_type: String,
}

impl EmbeddedCover {
    /// File extension derived from the MIME subtype, `png` when unknown.
    ///
    /// The subtype ends at the next `/` and must be a short run of
    /// `[a-z0-9+.-]`; it becomes part of a file name.
    pub fn extension(&self) -> &str {
        let subtype = self
            .mime_type
            .split('/')
            .nth(1)
            .map(str::trim)
            .unwrap_or_default();
        let valid = !subtype.is_empty()
            && subtype.len() <= 16
            && !subtype.starts_with('.')
            && subtype
                .bytes()
                .all(|b| matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'+' | b'.' | b'-'));
        if valid { subtype } else { "png" }
    }
}

/// Why a file could not be used. Carries a human-readable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct BadFile {
    pub reason: String,
}

impl BadFile {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Source of tag sets, swappable for tests.
pub trait MetadataReader: Send + Sync {
    /// Read the tags of `path`. `mtime` is carried through into the result.
    fn read(&self, path: &Path, mtime: i64) -> Result<TagSet, BadFile>;
}

/// [`MetadataReader`] backed by lofty.
#[derive(Debug, Clone, Default)]
pub struct LoftyReader;

impl LoftyReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataReader for LoftyReader {
    fn read(&self, path: &Path, mtime: i64) -> Result<TagSet, BadFile> {
        let tagged_file = Probe::open(path)
            .map_err(|e| BadFile::new(e.to_string()))?
            .guess_file_type()
            .map_err(|e| BadFile::new(e.to_string()))?
            .read()
            .map_err(|e| BadFile::new(e.to_string()))?;

        let length = tagged_file.properties().duration().as_secs_f64();
        if length <= 0.0 {
            return Err(BadFile::new("No playtime found"));
        }

        // Primary container first, the rest in file order
        let primary_type = tagged_file.primary_tag_type();
        let mut containers: Vec<&Tag> = Vec::new();
        if let Some(primary) = tagged_file.primary_tag() {
            containers.push(primary);
        }
        containers.extend(
            tagged_file
                .tags()
                .iter()
                .filter(|t| t.tag_type() != primary_type),
        );

        let lookups: Vec<&dyn TagLookup> = containers.iter().map(|t| *t as &dyn TagLookup).collect();
        Ok(resolve_tag_set(path, mtime, length, &lookups))
    }
}

/// Read-only view over one tag container.
pub trait TagLookup {
    /// Raw text stored under `key`, if any.
    fn text(&self, key: &ItemKey) -> Option<&str>;
    /// Front cover (or first picture) stored in this container.
    fn cover(&self) -> Option<EmbeddedCover>;
}

impl TagLookup for Tag {
    fn text(&self, key: &ItemKey) -> Option<&str> {
        self.get_string(key)
    }

    fn cover(&self) -> Option<EmbeddedCover> {
        let pictures = self.pictures();
        let picture = pictures
            .iter()
            .find(|p| p.pic_type() == PictureType::CoverFront)
            .or_else(|| pictures.first())?;

        if picture.data().is_empty() {
            return None;
        }

        let mime_type = match picture.mime_type() {
            Some(MimeType::Jpeg) => "image/jpeg".to_string(),
            Some(MimeType::Png) => "image/png".to_string(),
            Some(MimeType::Gif) => "image/gif".to_string(),
            Some(MimeType::Bmp) => "image/bmp".to_string(),
            Some(MimeType::Tiff) => "image/tiff".to_string(),
            Some(MimeType::Unknown(raw)) => raw.clone(),
            _ => String::new(),
        };

        Some(EmbeddedCover {
            data: picture.data().to_vec(),
            mime_type,
        })
    }
}

/// Text fields taken from the tag containers, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Artist,
    AlbumArtist,
    Album,
    Title,
    Lyrics,
    Compilation,
    Genre,
    Year,
}

const TEXT_FIELDS: [TextField; 8] = [
    TextField::Artist,
    TextField::AlbumArtist,
    TextField::Album,
    TextField::Title,
    TextField::Lyrics,
    TextField::Compilation,
    TextField::Genre,
    TextField::Year,
];

impl TextField {
    fn item_key(self) -> ItemKey {
        match self {
            TextField::Artist => ItemKey::TrackArtist,
            TextField::AlbumArtist => ItemKey::AlbumArtist,
            TextField::Album => ItemKey::AlbumTitle,
            TextField::Title => ItemKey::TrackTitle,
            TextField::Lyrics => ItemKey::Lyrics,
            TextField::Compilation => ItemKey::FlagCompilation,
            TextField::Genre => ItemKey::Genre,
            TextField::Year => ItemKey::Year,
        }
    }
}

/// Locations a track number may be stored under, highest priority first.
fn track_keys() -> [ItemKey; 3] {
    [
        ItemKey::TrackNumber,
        ItemKey::Unknown("TRACKNUMBER".to_string()),
        ItemKey::Unknown("TRACK_NUMBER".to_string()),
    ]
}

/// Flatten tag containers (primary first) into a [`TagSet`].
pub fn resolve_tag_set(
    path: &Path,
    mtime: i64,
    length: f64,
    containers: &[&dyn TagLookup],
) -> TagSet {
    let mut tags = TagSet {
        artist: String::new(),
        album_artist: String::new(),
        album: String::new(),
        title: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        track: resolve_track(containers),
        disc: first_text(containers, &ItemKey::DiscNumber)
            .and_then(leading_number)
            .unwrap_or(1),
        year: None,
        genre: String::new(),
        lyrics: String::new(),
        compilation: false,
        cover: containers.iter().find_map(|c| c.cover()),
        length,
        path: path.to_path_buf(),
        mtime,
    };

    for field in TEXT_FIELDS {
        let Some(value) = first_text(containers, &field.item_key()).map(clean_text) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        match field {
            TextField::Artist => tags.artist = value,
            TextField::AlbumArtist => tags.album_artist = value,
            TextField::Album => tags.album = value,
            TextField::Title => tags.title = value,
            TextField::Lyrics => tags.lyrics = value,
            TextField::Compilation => tags.compilation = is_truthy(&value),
            TextField::Genre => tags.genre = value,
            TextField::Year => {
                tags.year = leading_number(&value).and_then(|y| i32::try_from(y).ok())
            }
        }
    }

    // Taggers that don't write a compilation flag mark it with a distinct album artist
    if !tags.compilation {
        tags.compilation = !tags.album_artist.is_empty() && tags.album_artist != tags.artist;
    }

    tags
}

/// First non-empty value for `key`, primary container first.
fn first_text<'a>(containers: &[&'a dyn TagLookup], key: &ItemKey) -> Option<&'a str> {
    containers
        .iter()
        .filter_map(|c| c.text(key))
        .find(|s| !s.trim().is_empty())
}

fn resolve_track(containers: &[&dyn TagLookup]) -> u32 {
    for key in track_keys() {
        let found = containers
            .iter()
            .filter_map(|c| c.text(&key))
            .filter_map(leading_number)
            .find(|n| *n != 0);
        if let Some(track) = found {
            return track;
        }
    }
    0
}

/// Parse the leading integer of values like `"3"`, `"3/12"` or `"2001-05-04"`.
fn leading_number(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn clean_text(raw: &str) -> String {
    html_escape::decode_html_entities(raw).trim().to_string()
}
