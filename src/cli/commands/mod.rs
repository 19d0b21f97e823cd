//! CLI command definitions and dispatch.
//!
//! Each group of subcommands lives in its own submodule:
//! - `sync`: batch sync of a library root and watch mode
//! - `browse`: single-file inspection, listing and search
//! - `config`: config file location and contents

mod browse;
mod config;
mod sync;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::cover::CoverResolver;
use crate::db;
use crate::metadata::LoftyReader;
use crate::sync::{SyncTag, Synchronizer, TagSelection};

pub use browse::{cmd_info, cmd_list, cmd_search};
pub use config::cmd_config;
pub use sync::{cmd_sync, cmd_watch};

/// Music Sync CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// SQLite database file (overrides the config file)
    #[arg(long, global = true, env = "MUSIC_SYNC_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Sync a library root into the database
    Sync {
        /// Root directory (defaults to the roots in the config file)
        path: Option<PathBuf>,
        /// Tags re-applied to changed files, comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Re-read files even when their modification time is unchanged
        #[arg(long)]
        force: bool,
        /// Keep songs whose files have vanished
        #[arg(long)]
        no_prune: bool,
        /// Files reconciled concurrently
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Show the tags read from one file
    Info {
        /// Path to the audio file
        file: PathBuf,
    },
    /// List all songs in the database
    List,
    /// Search songs by title, album or artist
    Search {
        query: String,
    },
    /// Follow a library root and sync changes as they happen
    Watch {
        /// Root directory (defaults to the roots in the config file)
        path: Option<PathBuf>,
        /// Tags re-applied to changed files, comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Run a full sync before watching
        #[arg(long)]
        sync_first: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        init: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = crate::config::load();

    match &cli.command {
        Commands::Sync {
            path,
            tags,
            force,
            no_prune,
            concurrency,
        } => {
            let roots = roots(path.as_deref(), &config)?;
            let mut options = crate::library::SyncOptions {
                tags: tag_selection(tags, &config)?,
                force: *force,
                prune: config.library.prune_missing && !*no_prune,
                concurrency: config.scan.concurrency,
            };
            if let Some(n) = concurrency {
                options.concurrency = *n;
            }
            cmd_sync(&rt, cli.db.as_deref(), &config, &roots, &options)
        }
        Commands::Info { file } => cmd_info(file),
        Commands::List => cmd_list(&rt, cli.db.as_deref(), &config),
        Commands::Search { query } => cmd_search(&rt, cli.db.as_deref(), &config, query),
        Commands::Watch {
            path,
            tags,
            sync_first,
        } => {
            let roots = roots(path.as_deref(), &config)?;
            let options = crate::library::SyncOptions {
                tags: tag_selection(tags, &config)?,
                force: false,
                prune: config.library.prune_missing,
                concurrency: config.scan.concurrency,
            };
            cmd_watch(&rt, cli.db.as_deref(), &config, roots, &options, *sync_first)
        }
        Commands::Config { init } => cmd_config(&config, *init),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Open the database named on the command line, in the config, or the default.
pub(crate) async fn open_pool(db_path: Option<&Path>, config: &Config) -> anyhow::Result<sqlx::SqlitePool> {
    let path = db_path.or(config.database.path.as_deref());
    let url = db::db_url(path);
    tracing::debug!(target: "cli", url = %url, "Opening database");
    Ok(db::init_db(&url).await?)
}

/// Synchronizer over the configured database, lofty and cover store.
pub(crate) async fn open_synchronizer(
    db_path: Option<&Path>,
    config: &Config,
) -> anyhow::Result<Synchronizer> {
    let pool = open_pool(db_path, config).await?;
    let covers = CoverResolver::from_config(&config.covers);
    Ok(Synchronizer::new(pool, Arc::new(LoftyReader::new()), covers))
}

/// Command-line tags, else the configured defaults, else every tag.
fn tag_selection(requested: &[String], config: &Config) -> anyhow::Result<TagSelection> {
    let names = if requested.is_empty() {
        config.library.sync_tags.as_slice()
    } else {
        requested
    };
    if names.is_empty() {
        return Ok(SyncTag::ALL.into_iter().collect());
    }
    Ok(SyncTag::parse_list(names)?)
}

fn roots(path: Option<&Path>, config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    match path {
        Some(path) => Ok(vec![path.to_path_buf()]),
        None if !config.library.paths.is_empty() => Ok(config.library.paths.clone()),
        None => anyhow::bail!("No library path given and none configured in [library] paths"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_arguments() {
        let cli = Cli::try_parse_from([
            "music-sync", "--db", "lib.db", "sync", "/music", "--tags", "title,artist", "--force",
            "--no-prune",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("lib.db")));
        match cli.command {
            Commands::Sync {
                path,
                tags,
                force,
                no_prune,
                concurrency,
            } => {
                assert_eq!(path, Some(PathBuf::from("/music")));
                assert_eq!(tags, vec!["title", "artist"]);
                assert!(force);
                assert!(no_prune);
                assert_eq!(concurrency, None);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_tag_selection_falls_back_to_config_then_all() {
        let mut config = Config::default();
        config.library.sync_tags = vec!["lyrics".into()];
        let tags = tag_selection(&[], &config).unwrap();
        assert_eq!(tags.as_slice(), &[SyncTag::Lyrics]);

        let tags = tag_selection(&["Title".into(), "cover".into()], &config).unwrap();
        assert_eq!(tags.as_slice(), &[SyncTag::Title, SyncTag::Cover]);

        config.library.sync_tags.clear();
        assert_eq!(tag_selection(&[], &config).unwrap().len(), SyncTag::ALL.len());
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = tag_selection(&["bpm".into()], &Config::default()).unwrap_err();
        assert!(err.to_string().contains("bpm"));
    }

    #[test]
    fn test_roots_require_a_path() {
        let mut config = Config::default();
        assert!(roots(None, &config).is_err());

        config.library.paths = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        assert_eq!(roots(None, &config).unwrap().len(), 2);
        assert_eq!(
            roots(Some(Path::new("/c")), &config).unwrap(),
            vec![PathBuf::from("/c")]
        );
    }
}
