//! File-to-record reconciliation.
//!
//! A [`Synchronizer`] binds to one file at a time through [`Synchronizer::target`],
//! producing a [`SyncTarget`] that knows the file's identity, its modification
//! time and the song row (if any) already stored for it. [`SyncTarget::sync`]
//! then decides between three outcomes:
//!
//! - **Unmodified**: the file is known and unchanged, and no force was asked
//! - **BadFile**: tags could not be read; see [`SyncTarget::sync_error`]
//! - **Success**: artist, album, cover and song were written in one transaction
//!
//! Cover images are read and stored before that transaction starts, so the
//! write lock is only held for database work.
//!
//! New files always get every tag. Known files that changed (or are forced)
//! only get the tags in the caller's allowlist; everything else keeps its
//! stored value.

mod identity;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::cover::{CoverResolver, ResolvedCover, StoredCover};
use crate::db;
use crate::error::{Error, Result, ResultExt};
use crate::metadata::{BadFile, MetadataReader, TagSet};
use crate::model::{Album, Song, VARIOUS_ARTIST_ID, normalize_lyrics};
use crate::storage::StorageType;

pub use identity::{FileState, TrackIdentity, modified_time};

/// A tag a changed file may have re-applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTag {
    Title,
    Artist,
    Album,
    Compilation,
    Track,
    Disc,
    Lyrics,
    Length,
    Year,
    Genre,
    Cover,
}

/// Tag allowlist, small enough to live on the stack.
pub type TagSelection = SmallVec<[SyncTag; 11]>;

impl SyncTag {
    pub const ALL: [SyncTag; 11] = [
        SyncTag::Title,
        SyncTag::Artist,
        SyncTag::Album,
        SyncTag::Compilation,
        SyncTag::Track,
        SyncTag::Disc,
        SyncTag::Lyrics,
        SyncTag::Length,
        SyncTag::Year,
        SyncTag::Genre,
        SyncTag::Cover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTag::Title => "title",
            SyncTag::Artist => "artist",
            SyncTag::Album => "album",
            SyncTag::Compilation => "compilation",
            SyncTag::Track => "track",
            SyncTag::Disc => "disc",
            SyncTag::Lyrics => "lyrics",
            SyncTag::Length => "length",
            SyncTag::Year => "year",
            SyncTag::Genre => "genre",
            SyncTag::Cover => "cover",
        }
    }

    /// Parse a list of tag names, rejecting unknown ones.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<TagSelection> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl fmt::Display for SyncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        SyncTag::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| Error::InvalidTag(s.to_string()))
    }
}

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    Success,
    BadFile,
    Unmodified,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOutcome::Success => "success",
            SyncOutcome::BadFile => "bad file",
            SyncOutcome::Unmodified => "unmodified",
        })
    }
}

/// Which tags a sync applies.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    tags: TagSelection,
    /// `compilation` was asked for without `album`: only the compilation
    /// flag of the song's current album may change
    compilation_only: bool,
}

impl Selection {
    fn all() -> Self {
        Self {
            tags: SyncTag::ALL.into_iter().collect(),
            compilation_only: false,
        }
    }

    fn restricted(requested: &[SyncTag]) -> Self {
        let mut tags: TagSelection = SmallVec::new();
        for tag in requested {
            if !tags.contains(tag) {
                tags.push(*tag);
            }
        }

        let compilation_only = tags.contains(&SyncTag::Compilation) && !tags.contains(&SyncTag::Album);
        if compilation_only {
            tags.push(SyncTag::Album);
        }
        Self {
            tags,
            compilation_only,
        }
    }

    fn applies(&self, tag: SyncTag) -> bool {
        self.tags.contains(&tag)
    }
}

/// Reconciles files against the library. Cheap to clone.
#[derive(Clone)]
pub struct Synchronizer {
    pool: SqlitePool,
    reader: Arc<dyn MetadataReader>,
    covers: CoverResolver,
}

impl Synchronizer {
    pub fn new(pool: SqlitePool, reader: Arc<dyn MetadataReader>, covers: CoverResolver) -> Self {
        Self {
            pool,
            reader,
            covers,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bind to one file: compute its identity and look up its stored song.
    ///
    /// An unreadable modification time is not an error (see [`modified_time`]).
    pub async fn target(&self, path: impl AsRef<Path>) -> Result<SyncTarget<'_>> {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let identity = TrackIdentity::of(&path);
        let mtime = modified_time(&path);
        let existing = db::get_song(&self.pool, identity.as_str())
            .await
            .with_context(format!("looking up {}", path.display()))?;

        Ok(SyncTarget {
            sync: self,
            path,
            identity,
            mtime,
            existing,
            info: None,
            sync_error: None,
        })
    }
}

/// A [`Synchronizer`] bound to one file.
pub struct SyncTarget<'a> {
    sync: &'a Synchronizer,
    path: PathBuf,
    identity: TrackIdentity,
    mtime: i64,
    existing: Option<Song>,
    info: Option<std::result::Result<TagSet, BadFile>>,
    sync_error: Option<String>,
}

impl SyncTarget<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &TrackIdentity {
        &self.identity
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    /// Stored song: the prior row before a sync, the written row after a
    /// successful one.
    pub fn song(&self) -> Option<&Song> {
        self.existing.as_ref()
    }

    pub fn state(&self) -> FileState {
        FileState::classify(self.existing.as_ref().map(|s| s.mtime), self.mtime)
    }

    pub fn is_file_new(&self) -> bool {
        self.state() == FileState::New
    }

    pub fn is_file_changed(&self) -> bool {
        self.state() == FileState::Changed
    }

    pub fn is_file_new_or_changed(&self) -> bool {
        self.state() != FileState::Unchanged
    }

    /// Diagnostic of the last failed extraction.
    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }

    /// Read the file's tags. `None` means a bad file; the reason is then
    /// available from [`SyncTarget::sync_error`].
    pub async fn file_info(&mut self) -> Option<TagSet> {
        if self.info.is_none() {
            let reader = self.sync.reader.clone();
            let path = self.path.clone();
            let mtime = self.mtime;
            let read = tokio::task::spawn_blocking(move || reader.read(&path, mtime))
                .await
                .unwrap_or_else(|e| Err(BadFile::new(format!("metadata reader panicked: {e}"))));
            self.info = Some(read);
        }

        match self.info.as_ref() {
            Some(Ok(tags)) => Some(tags.clone()),
            Some(Err(bad)) => {
                self.sync_error = Some(bad.reason.clone());
                None
            }
            None => None,
        }
    }

    /// Reconcile the file with the library.
    ///
    /// `tags` only matters for known files that changed or are forced; new
    /// files always get every tag.
    pub async fn sync(&mut self, tags: &[SyncTag], force: bool) -> Result<SyncOutcome> {
        if !self.is_file_new_or_changed() && !force {
            tracing::trace!(target: "sync", path = %self.path.display(), "Unmodified");
            return Ok(SyncOutcome::Unmodified);
        }

        let Some(info) = self.file_info().await else {
            tracing::debug!(
                target: "sync",
                path = %self.path.display(),
                reason = self.sync_error.as_deref().unwrap_or_default(),
                "Bad file"
            );
            return Ok(SyncOutcome::BadFile);
        };

        let selection = if self.is_file_new() {
            Selection::all()
        } else {
            Selection::restricted(tags)
        };

        let cover = self.prepare_cover(&info, &selection).await?;

        let mut conn = self.sync.pool.acquire().await?;
        db::begin_immediate(&mut conn).await?;

        let result = match self.persist(&mut conn, &info, &selection, cover.as_ref()).await {
            Ok(persisted) => db::commit(&mut conn).await.map(|_| persisted),
            Err(e) => Err(e),
        };
        if result.is_err() {
            db::rollback(&mut conn).await;
        }

        let cover_used = matches!(result, Ok((_, true)));
        if let Some(cover) = cover.filter(|c| c.stored.created && !cover_used)
            && let Err(e) = self.discard_cover(&mut conn, &cover.stored).await
        {
            tracing::warn!(target: "sync", file = %cover.stored.file_name, error = %e, "Failed to discard unused cover");
        }

        match result {
            Ok((song, _)) => {
                tracing::debug!(
                    target: "sync",
                    path = %self.path.display(),
                    album_id = song.album_id,
                    artist_id = song.artist_id,
                    "Synced"
                );
                self.existing = Some(song);
                Ok(SyncOutcome::Success)
            }
            Err(e) => Err(e.context(format!("syncing {}", self.path.display()))),
        }
    }

    /// Store the cover this file offers, on a blocking thread.
    ///
    /// Embedded art only counts when `cover` is selected; a sidecar image
    /// always does.
    async fn prepare_cover(&self, info: &TagSet, selection: &Selection) -> Result<Option<ResolvedCover>> {
        let embedded = if selection.applies(SyncTag::Cover) {
            info.cover.clone()
        } else {
            None
        };
        let covers = self.sync.covers.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || covers.prepare(embedded.as_ref(), &path))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(target: "sync", error = %e, "Cover preparation panicked");
                Ok(None)
            })
            .with_context(format!("preparing cover for {}", self.path.display()))
    }

    /// Remove a cover file this sync created but no album recorded.
    ///
    /// Runs under the write lock. A concurrent sync holding the same image
    /// either commits first (the file stays) or finds it gone in `persist`.
    async fn discard_cover(&self, conn: &mut SqliteConnection, cover: &StoredCover) -> Result<()> {
        db::begin_immediate(&mut *conn).await?;
        match db::cover_in_use(&mut *conn, &cover.file_name).await {
            Ok(in_use) => {
                if !in_use {
                    self.sync.covers.store().remove(cover);
                }
                db::commit(conn).await
            }
            Err(e) => {
                db::rollback(conn).await;
                Err(e)
            }
        }
    }

    /// Write artist, album, cover and song. The flag is true when `cover`
    /// was recorded on the album.
    async fn persist(
        &self,
        conn: &mut SqliteConnection,
        info: &TagSet,
        selection: &Selection,
        cover: Option<&ResolvedCover>,
    ) -> Result<(Song, bool)> {
        let (artist_id, album) = match &self.existing {
            None => {
                let artist_id = db::get_or_create_artist(conn, &info.artist).await?;
                let owner = album_owner(artist_id, info.compilation);
                let album = db::get_or_create_album(conn, owner, &info.album, info.compilation).await?;
                (artist_id, album)
            }
            Some(existing) => self.resolve_update(conn, existing, info, selection).await?,
        };

        let mut cover_used = false;
        if let Some(cover) = cover
            && !album.has_cover()
        {
            if cover.stored.path.exists() {
                db::set_album_cover(&mut *conn, album.id, &cover.stored.file_name).await?;
                cover_used = true;
                tracing::debug!(
                    target: "sync",
                    album = %album.name,
                    file = %cover.stored.file_name,
                    source = ?cover.source,
                    "Album cover set"
                );
            } else {
                tracing::debug!(target: "sync", file = %cover.stored.file_name, "Cover discarded by another sync");
            }
        }

        let mut song = self.existing.clone().unwrap_or_else(|| Song {
            id: self.identity.as_str().to_string(),
            album_id: album.id,
            artist_id,
            title: String::new(),
            length: 0.0,
            track: 0,
            disc: 1,
            year: None,
            genre: String::new(),
            lyrics: String::new(),
            path: String::new(),
            mtime: self.mtime,
            storage: StorageType::Local.as_str().to_string(),
        });
        apply_fields(&mut song, info, selection);
        song.album_id = album.id;
        song.artist_id = artist_id;
        song.path = self.path.to_string_lossy().into_owned();
        song.mtime = self.mtime;

        db::upsert_song(&mut *conn, &song).await?;
        Ok((song, cover_used))
    }

    /// Artist and album for a known file under a restricted selection.
    async fn resolve_update(
        &self,
        conn: &mut SqliteConnection,
        existing: &Song,
        info: &TagSet,
        selection: &Selection,
    ) -> Result<(i64, Album)> {
        let current_album = db::get_album(&mut *conn, existing.album_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
            .with_context(format!("loading album {} of song {}", existing.album_id, existing.id))?;

        let artist_id = if selection.applies(SyncTag::Artist) {
            db::get_or_create_artist(conn, &info.artist).await?
        } else {
            current_album.artist_id
        };

        let is_compilation = if selection.applies(SyncTag::Compilation) {
            info.compilation
        } else {
            current_album.is_compilation
        };

        if selection.compilation_only {
            let album = self.reflag(conn, current_album, artist_id, is_compilation).await?;
            return Ok((artist_id, album));
        }

        if selection.applies(SyncTag::Album) {
            let owner = album_owner(artist_id, is_compilation);
            let album = db::get_or_create_album(conn, owner, &info.album, is_compilation).await?;
            return Ok((artist_id, album));
        }

        Ok((artist_id, current_album))
    }

    /// Flip the compilation flag of the song's current album in place.
    ///
    /// If another album already holds the resulting natural key, the album
    /// is left alone and the song stays on it.
    async fn reflag(
        &self,
        conn: &mut SqliteConnection,
        album: Album,
        artist_id: i64,
        is_compilation: bool,
    ) -> Result<Album> {
        if album.is_compilation == is_compilation {
            return Ok(album);
        }

        let owner = album_owner(artist_id, is_compilation);
        match db::reflag_album(&mut *conn, album.id, owner, is_compilation).await {
            Ok(()) => Ok(Album {
                artist_id: owner,
                is_compilation,
                ..album
            }),
            Err(e) if e.is_unique_violation() => {
                tracing::warn!(
                    target: "sync",
                    album = %album.name,
                    is_compilation,
                    "Another album already has this compilation status, leaving album unchanged"
                );
                Ok(album)
            }
            Err(e) => Err(e),
        }
    }
}

/// Compilations belong to Various Artists.
fn album_owner(artist_id: i64, is_compilation: bool) -> i64 {
    if is_compilation {
        VARIOUS_ARTIST_ID
    } else {
        artist_id
    }
}

/// Copy the selected plain fields from `info` onto `song`.
fn apply_fields(song: &mut Song, info: &TagSet, selection: &Selection) {
    if selection.applies(SyncTag::Title) {
        song.title = info.title.clone();
    }
    if selection.applies(SyncTag::Track) {
        song.track = i64::from(info.track);
    }
    if selection.applies(SyncTag::Disc) {
        song.disc = i64::from(info.disc);
    }
    if selection.applies(SyncTag::Lyrics) {
        song.lyrics = normalize_lyrics(&info.lyrics);
    }
    if selection.applies(SyncTag::Length) {
        song.length = info.length;
    }
    if selection.applies(SyncTag::Year) {
        song.year = info.year.map(i64::from);
    }
    if selection.applies(SyncTag::Genre) {
        song.genre = info.genre.clone();
    }
}
