//! Inspection commands: one file's tags, the song list, search.

use std::path::Path;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::db::{self, SongWithNames};
use crate::metadata::{LoftyReader, MetadataReader};
use crate::sync::modified_time;

use super::open_pool;

/// Print the tag set read from one file as JSON
pub fn cmd_info(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!("Not a file: {}", path.display());
    }

    let path = std::path::absolute(path)?;
    match LoftyReader::new().read(&path, modified_time(&path)) {
        Ok(tags) => {
            println!("{}", serde_json::to_string_pretty(&tags)?);
            Ok(())
        }
        Err(bad) => anyhow::bail!("Bad file {}: {}", path.display(), bad),
    }
}

/// List all songs in the database
pub fn cmd_list(rt: &Runtime, db_path: Option<&Path>, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_pool(db_path, config).await?;
        let songs = db::get_all_songs_with_names(&pool).await?;
        for song in &songs {
            println!("{}", format_song(song));
        }
        println!("{} songs", songs.len());
        Ok(())
    })
}

/// Search songs by title, album or artist
pub fn cmd_search(
    rt: &Runtime,
    db_path: Option<&Path>,
    config: &Config,
    query: &str,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_pool(db_path, config).await?;
        let songs = db::search_songs(&pool, query).await?;
        if songs.is_empty() {
            println!("No songs match \"{}\"", query);
        }
        for song in &songs {
            println!("{}", format_song(song));
        }
        Ok(())
    })
}

fn format_song(song: &SongWithNames) -> String {
    let minutes = (song.length / 60.0).floor() as u64;
    let seconds = (song.length % 60.0).floor() as u64;
    format!(
        "{} - {} [{}] {:02}. {} ({}:{:02}) {}",
        song.album_artist_name,
        song.album_name,
        song.artist_name,
        song.track,
        song.display_title(),
        minutes,
        seconds,
        song.path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(title: &str, length: f64) -> SongWithNames {
        SongWithNames {
            id: "id".into(),
            title: title.into(),
            path: "/music/Band/Album/03 Song.mp3".into(),
            length,
            track: 3,
            disc: 1,
            year: None,
            artist_name: "Band".into(),
            album_name: "Album".into(),
            album_artist_name: "Band".into(),
            is_compilation: false,
        }
    }

    #[test]
    fn test_format_song() {
        assert_eq!(
            format_song(&song("Song", 185.4)),
            "Band - Album [Band] 03. Song (3:05) /music/Band/Album/03 Song.mp3"
        );
    }

    #[test]
    fn test_format_song_untitled_uses_file_stem() {
        assert!(format_song(&song("", 60.0)).contains("03. 03 Song (1:00)"));
    }

    #[test]
    fn test_info_rejects_missing_file() {
        assert!(cmd_info(Path::new("/no/such/file.mp3")).is_err());
    }
}
