//! Library sync and watch commands.

use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::db;
use crate::library::{self, SyncEvent, SyncOptions, SyncSummary};

use super::open_synchronizer;

/// Sync one or more library roots
pub fn cmd_sync(
    rt: &Runtime,
    db_path: Option<&Path>,
    config: &Config,
    roots: &[PathBuf],
    options: &SyncOptions,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let sync = open_synchronizer(db_path, config).await?;

        for root in roots {
            println!("Syncing directory: {}", root.display());
            let mut count = 0;
            let summary = library::sync_library(&sync, root, options, |event| {
                report(event, &mut count);
            })
            .await?;
            print_summary(&summary);
        }
        println!("Library now holds {} songs.", db::count_songs(sync.pool()).await?);
        Ok(())
    })
}

/// Follow library roots until Ctrl+C
pub fn cmd_watch(
    rt: &Runtime,
    db_path: Option<&Path>,
    config: &Config,
    roots: Vec<PathBuf>,
    options: &SyncOptions,
    sync_first: bool,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let sync = open_synchronizer(db_path, config).await?;

        if sync_first {
            for root in &roots {
                println!("Running initial sync of {}...", root.display());
                let mut count = 0;
                let summary = library::sync_library(&sync, root, options, |event| {
                    report(event, &mut count);
                })
                .await?;
                print_summary(&summary);
            }
        }

        for root in &roots {
            println!("Watching for changes in: {}", root.display());
        }
        println!("Press Ctrl+C to stop.\n");

        library::watch(&sync, roots, options, |event| match event {
            SyncEvent::Synced(p) => println!("~ SYNCED: {}", p.display()),
            SyncEvent::Removed(p) => println!("- REMOVED: {}", p.display()),
            SyncEvent::Unmodified(_) => {}
            SyncEvent::BadFile { path, reason } => {
                println!("! BAD FILE: {} ({})", path.display(), reason)
            }
            SyncEvent::Failed { path, error } => {
                eprintln!("! FAILED: {} ({})", path.display(), error)
            }
        })
        .await?;
        Ok(())
    })
}

fn report(event: &SyncEvent, count: &mut usize) {
    match event {
        SyncEvent::Synced(_) | SyncEvent::Unmodified(_) => {
            *count += 1;
            if *count % 100 == 0 {
                print!("\rProcessed {} files...", count);
                let _ = std::io::stdout().flush();
            }
        }
        SyncEvent::BadFile { path, reason } => {
            eprintln!("\nSkipping {}: {}", path.display(), reason);
        }
        SyncEvent::Failed { path, error } => {
            eprintln!("\nError processing {}: {}", path.display(), error);
        }
        SyncEvent::Removed(path) => {
            println!("\nRemoved {}", path.display());
        }
    }
}

fn print_summary(summary: &SyncSummary) {
    if summary.walk_errors > 0 {
        eprintln!(
            "\n{} entries could not be read; vanished songs were not pruned.",
            summary.walk_errors
        );
    }
    println!(
        "\nSync complete. {} files: {} synced, {} unmodified, {} bad, {} failed. {} pruned.",
        summary.total(),
        summary.synced, summary.unmodified, summary.bad, summary.failed, summary.pruned
    );
}
