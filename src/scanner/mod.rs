//! Audio file discovery.
//!
//! [`scan`] walks a library root once; [`FileWatcher`] reports changes
//! afterwards.

mod watcher;

use futures::stream::Stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use walkdir::WalkDir;

pub use watcher::{FileWatcher, WatchError, WatchEvent};

/// Extensions treated as audio, lowercase.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "opus", "wav", "m4a", "aac"];

/// Whether `path` has an audio extension (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Number of entries a [`scan`] could not read.
///
/// Final once the scan's stream has ended.
#[derive(Debug, Clone, Default)]
pub struct ScanErrors(Arc<AtomicUsize>);

impl ScanErrors {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn record(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }
}

/// Scans the given root directory recursively for audio files.
///
/// Symlinks are followed. Unreadable entries (including a missing root) are
/// skipped with a warning and counted in the returned [`ScanErrors`].
pub fn scan(root: PathBuf) -> (impl Stream<Item = PathBuf>, ScanErrors) {
    let (tx, rx) = mpsc::channel(100);
    let errors = ScanErrors::default();
    let walk_errors = errors.clone();

    // Directory traversal is blocking
    tokio::task::spawn_blocking(move || {
        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(target: "scanner", error = %e, "Skipping unreadable entry");
                    walk_errors.record();
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
                continue;
            }
            // Receiver dropped: stop walking
            if tx.blocking_send(entry.into_path()).is_err() {
                break;
            }
        }
    });

    let paths = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|path| (path, rx))
    });
    (paths, errors)
}
