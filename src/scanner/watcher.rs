//! File system watcher for library changes.
//!
//! Wraps `notify` with the full debouncer so a file being copied in emits
//! one event instead of dozens. Only audio files (and new directories, which
//! may contain audio files) are reported. Renames are split into a removal
//! of the old path and a creation of the new one.
//!
//! ```rust,ignore
//! let (watcher, rx) = FileWatcher::new(vec!["/music".into()])?;
//! while let Ok(event) = rx.recv() {
//!     match event {
//!         WatchEvent::Created(path) | WatchEvent::Modified(path) => resync(path),
//!         WatchEvent::Removed(path) => forget(path),
//!         _ => {}
//!     }
//! }
//! ```

use crossbeam_channel::{Receiver, Sender, bounded};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::is_audio_file;

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A new audio file appeared (created or renamed into place)
    Created(PathBuf),
    /// An existing audio file was written to
    Modified(PathBuf),
    /// An audio file was deleted or renamed away
    Removed(PathBuf),
    /// A directory appeared; its contents need a scan
    DirCreated(PathBuf),
    /// The watcher backend reported an error
    Error(String),
}

/// Handle to a running file watcher. Dropping it stops watching.
pub struct FileWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    running: Arc<AtomicBool>,
}

impl FileWatcher {
    /// Watch the given directories recursively.
    pub fn new(roots: Vec<PathBuf>) -> Result<(Self, Receiver<WatchEvent>), WatchError> {
        let (tx, rx) = bounded(256);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let debouncer = new_debouncer(
            Duration::from_millis(500),
            None,
            move |result: DebounceEventResult| {
                if running_clone.load(Ordering::Relaxed) {
                    forward(result, &tx);
                }
            },
        )
        .map_err(|e| WatchError::Init(e.to_string()))?;

        let mut watcher = Self { debouncer, running };
        for root in &roots {
            watcher.watch(root)?;
        }
        Ok((watcher, rx))
    }

    pub fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        tracing::info!(target: "scanner::watcher", path = %path.display(), "Watching directory");
        self.debouncer
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Watch(e.to_string()))
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        tracing::debug!(target: "scanner::watcher", "File watcher stopped");
    }
}

fn forward(result: DebounceEventResult, tx: &Sender<WatchEvent>) {
    match result {
        Ok(events) => {
            for event in events {
                for (index, path) in event.paths.iter().enumerate() {
                    if let Some(evt) = classify(&event.kind, index, path) {
                        tracing::debug!(target: "scanner::watcher", event = ?evt, "Library change");
                        // A full channel drops the event; the next full sync catches it
                        let _ = tx.try_send(evt);
                    }
                }
            }
        }
        Err(errors) => {
            for error in errors {
                tracing::warn!(target: "scanner::watcher", error = %error, "Watch error");
                let _ = tx.try_send(WatchEvent::Error(error.to_string()));
            }
        }
    }
}

/// Map one notify event path to a library event.
///
/// `index` is the position of `path` in the event; for a two-path rename
/// the first path is the old name and the second the new one.
fn classify(kind: &EventKind, index: usize, path: &Path) -> Option<WatchEvent> {
    let audio = is_audio_file(path);
    let owned = || path.to_path_buf();

    match kind {
        EventKind::Create(CreateKind::Folder) => Some(WatchEvent::DirCreated(owned())),
        EventKind::Create(_) if audio => Some(WatchEvent::Created(owned())),
        EventKind::Modify(ModifyKind::Name(mode)) => {
            let gone = match mode {
                RenameMode::From => true,
                RenameMode::To => false,
                RenameMode::Both => index == 0,
                _ => !path.exists(),
            };
            if gone {
                audio.then(|| WatchEvent::Removed(owned()))
            } else if path.is_dir() {
                Some(WatchEvent::DirCreated(owned()))
            } else {
                audio.then(|| WatchEvent::Created(owned()))
            }
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any)
            if audio =>
        {
            Some(WatchEvent::Modified(owned()))
        }
        EventKind::Remove(RemoveKind::File | RemoveKind::Any) if audio => {
            Some(WatchEvent::Removed(owned()))
        }
        _ => None,
    }
}

/// Errors that can occur during file watching.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {0}")]
    Init(String),
    #[error("Failed to watch path: {0}")]
    Watch(String),
}

impl From<WatchError> for crate::error::Error {
    fn from(err: WatchError) -> Self {
        crate::error::Error::Watch(err.to_string())
    }
}
