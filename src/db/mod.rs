//! Database module for song, artist, and album persistence.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Provides async operations for:
//! - Atomic get-or-create of artists and albums by natural key
//! - Song upsert keyed by path identity
//! - Listing, search and pruning
//!
//! Functions that are one statement accept any executor (pool, connection
//! or transaction). Multi-statement functions take a `&mut SqliteConnection`
//! so callers can run them inside a write transaction opened with
//! [`begin_immediate`].
//!
//! # Example
//!
//! ```ignore
//! use music_sync::db::{init_db, get_all_songs_with_names};
//!
//! let pool = init_db("sqlite:music.db").await?;
//! let songs = get_all_songs_with_names(&pool).await?;
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Executor, Sqlite};

use crate::error::Result;
use crate::model::{
    Album, Artist, Song, UNKNOWN_ALBUM_NAME, UNKNOWN_ARTIST_ID, VARIOUS_ARTIST_ID,
};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "music_sync.db";

const SONG_COLUMNS: &str = "id, album_id, artist_id, title, length, track, disc, year, genre, \
                            lyrics, path, mtime, storage";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist. WAL mode and a busy
/// timeout let several sync workers write without tripping over each other.
pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// ============================================================================
// Write transactions
// ============================================================================

/// Start a write transaction, taking the database write lock immediately.
///
/// A deferred transaction that reads first and writes later can fail with
/// `SQLITE_BUSY` on upgrade when another connection got there first.
pub async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(())
}

pub async fn commit(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("COMMIT").execute(&mut *conn).await?;
    Ok(())
}

/// Roll back, logging instead of failing.
pub async fn rollback(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::warn!(target: "db", error = %e, "Rollback failed");
    }
}

// ============================================================================
// Artists and albums
// ============================================================================

/// Get or create an artist by name.
///
/// An empty name maps to the reserved unknown artist. Safe under concurrent
/// callers: the insert is a no-op when another writer created the row first.
pub async fn get_or_create_artist(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(UNKNOWN_ARTIST_ID);
    }

    sqlx::query("INSERT INTO artists (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(&mut *conn)
        .await?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM artists WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Get or create an album by (artist, name, compilation flag).
///
/// An empty name maps to [`UNKNOWN_ALBUM_NAME`].
pub async fn get_or_create_album(
    conn: &mut SqliteConnection,
    artist_id: i64,
    name: &str,
    is_compilation: bool,
) -> Result<Album> {
    let name = match name.trim() {
        "" => UNKNOWN_ALBUM_NAME,
        trimmed => trimmed,
    };

    sqlx::query(
        "INSERT INTO albums (artist_id, name, is_compilation) VALUES (?, ?, ?) \
         ON CONFLICT(artist_id, name, is_compilation) DO NOTHING",
    )
    .bind(artist_id)
    .bind(name)
    .bind(is_compilation)
    .execute(&mut *conn)
    .await?;

    let album = sqlx::query_as::<_, Album>(
        "SELECT id, artist_id, name, is_compilation, cover FROM albums \
         WHERE artist_id = ? AND name = ? AND is_compilation = ?",
    )
    .bind(artist_id)
    .bind(name)
    .bind(is_compilation)
    .fetch_one(&mut *conn)
    .await?;
    Ok(album)
}

pub async fn get_artist<'e, E>(executor: E, id: i64) -> Result<Option<Artist>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let artist = sqlx::query_as::<_, Artist>("SELECT id, name FROM artists WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(artist)
}

pub async fn get_album<'e, E>(executor: E, id: i64) -> Result<Option<Album>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let album = sqlx::query_as::<_, Album>(
        "SELECT id, artist_id, name, is_compilation, cover FROM albums WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(album)
}

/// Change an album's compilation flag and owner in place.
///
/// Fails with a unique violation when an album with the resulting natural
/// key already exists; see [`crate::error::Error::is_unique_violation`].
pub async fn reflag_album<'e, E>(
    executor: E,
    album_id: i64,
    artist_id: i64,
    is_compilation: bool,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE albums SET artist_id = ?, is_compilation = ? WHERE id = ?")
        .bind(artist_id)
        .bind(is_compilation)
        .bind(album_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Record the stored cover file name of an album.
pub async fn set_album_cover<'e, E>(executor: E, album_id: i64, cover: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE albums SET cover = ? WHERE id = ?")
        .bind(cover)
        .bind(album_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Whether any album records `cover` as its cover file.
pub async fn cover_in_use<'e, E>(executor: E, cover: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM albums WHERE cover = ? LIMIT 1")
        .bind(cover)
        .fetch_optional(executor)
        .await?;
    Ok(row.is_some())
}

// ============================================================================
// Songs
// ============================================================================

/// Get a song by its path identity.
pub async fn get_song<'e, E>(executor: E, id: &str) -> Result<Option<Song>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let song = sqlx::query_as::<_, Song>(&format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(song)
}

/// Insert or update a song row, matched by id.
pub async fn upsert_song<'e, E>(executor: E, song: &Song) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = chrono::Utc::now().to_rfc3339();
    let storage = if song.storage.is_empty() {
        crate::storage::StorageType::Local.as_str()
    } else {
        song.storage.as_str()
    };

    sqlx::query(
        r#"
        INSERT INTO songs (id, album_id, artist_id, title, length, track, disc, year, genre,
                           lyrics, path, mtime, storage, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            album_id = excluded.album_id,
            artist_id = excluded.artist_id,
            title = excluded.title,
            length = excluded.length,
            track = excluded.track,
            disc = excluded.disc,
            year = excluded.year,
            genre = excluded.genre,
            lyrics = excluded.lyrics,
            path = excluded.path,
            mtime = excluded.mtime,
            storage = excluded.storage,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&song.id)
    .bind(song.album_id)
    .bind(song.artist_id)
    .bind(&song.title)
    .bind(song.length)
    .bind(song.track)
    .bind(song.disc)
    .bind(song.year)
    .bind(&song.genre)
    .bind(&song.lyrics)
    .bind(&song.path)
    .bind(song.mtime)
    .bind(storage)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete a song by identity. Returns whether a row was removed.
pub async fn delete_song<'e, E>(executor: E, id: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM songs WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Identities of local songs whose path lies under `root`.
pub async fn song_ids_under(pool: &SqlitePool, root: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM songs WHERE storage = 'local' AND substr(path, 1, length(?1)) = ?1",
    )
    .bind(root)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Delete many songs in one transaction. Returns the number removed.
pub async fn delete_songs(pool: &SqlitePool, ids: &[String]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut removed = 0;
    for id in ids {
        let result = sqlx::query("DELETE FROM songs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        removed += result.rows_affected();
    }
    tx.commit().await?;
    Ok(removed)
}

/// Remove albums without songs, then artists without songs or albums.
///
/// The reserved artists are always kept. Returns (albums, artists) removed.
pub async fn prune_orphans(pool: &SqlitePool) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    let albums = sqlx::query("DELETE FROM albums WHERE id NOT IN (SELECT DISTINCT album_id FROM songs)")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let artists = sqlx::query(
        "DELETE FROM artists WHERE id NOT IN (?, ?) \
         AND id NOT IN (SELECT DISTINCT artist_id FROM songs) \
         AND id NOT IN (SELECT DISTINCT artist_id FROM albums)",
    )
    .bind(UNKNOWN_ARTIST_ID)
    .bind(VARIOUS_ARTIST_ID)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;
    Ok((albums, artists))
}

pub async fn count_songs(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM songs")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ============================================================================
// Listing
// ============================================================================

/// Song with joined artist and album names, for display.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SongWithNames {
    pub id: String,
    pub title: String,
    pub path: String,
    /// Duration in seconds
    pub length: f64,
    pub track: i64,
    pub disc: i64,
    pub year: Option<i64>,
    pub artist_name: String,
    pub album_name: String,
    /// Owner of the album (Various Artists for compilations)
    pub album_artist_name: String,
    pub is_compilation: bool,
}

impl SongWithNames {
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// Title for display, falling back to the file stem.
    pub fn display_title(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        self.path_buf()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

const SONG_WITH_NAMES_SELECT: &str = r#"
    SELECT
        s.id, s.title, s.path, s.length, s.track, s.disc, s.year,
        a.name AS artist_name,
        al.name AS album_name,
        aa.name AS album_artist_name,
        al.is_compilation
    FROM songs s
    JOIN artists a ON s.artist_id = a.id
    JOIN albums al ON s.album_id = al.id
    JOIN artists aa ON al.artist_id = aa.id
"#;

/// All songs ordered by album artist, album, disc and track.
pub async fn get_all_songs_with_names(pool: &SqlitePool) -> Result<Vec<SongWithNames>> {
    let sql = format!(
        "{SONG_WITH_NAMES_SELECT} ORDER BY aa.name, al.name, s.disc, s.track, s.title"
    );
    let songs = sqlx::query_as::<_, SongWithNames>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(songs)
}

/// Case-insensitive substring search over title, album and artist.
///
/// The reserved artists never match by name: searching "unknown" should not
/// return every untagged file.
pub async fn search_songs(pool: &SqlitePool, query: &str) -> Result<Vec<SongWithNames>> {
    let pattern = format!("%{}%", query.trim());
    let sql = format!(
        "{SONG_WITH_NAMES_SELECT} \
         WHERE s.title LIKE ?1 \
            OR al.name LIKE ?1 \
            OR (a.name LIKE ?1 AND a.id NOT IN (?2, ?3)) \
         ORDER BY aa.name, al.name, s.disc, s.track"
    );
    let songs = sqlx::query_as::<_, SongWithNames>(&sql)
        .bind(pattern)
        .bind(UNKNOWN_ARTIST_ID)
        .bind(VARIOUS_ARTIST_ID)
        .fetch_all(pool)
        .await?;
    Ok(songs)
}
