//! Batch driver: reconcile a whole library root, or follow it as it changes.
//!
//! Files are reconciled concurrently through a [`Synchronizer`]. A bad file
//! or a failed write is reported as an event and never stops the batch.
//! After a complete pass, songs under the root whose files were not found
//! are deleted (when pruning is enabled). A pass that hit unreadable
//! entries is not complete and prunes nothing.

use std::collections::HashSet;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::db;
use crate::error::{Result, ResultExt};
use crate::scanner::{self, FileWatcher, ScanErrors, WatchEvent};
use crate::storage::StorageMetadata;
use crate::sync::{SyncOutcome, SyncTag, Synchronizer, TagSelection, TrackIdentity};

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Synced(PathBuf),
    Unmodified(PathBuf),
    BadFile { path: PathBuf, reason: String },
    Failed { path: PathBuf, error: String },
    /// The song of a vanished file was deleted
    Removed(PathBuf),
}

impl SyncEvent {
    pub fn path(&self) -> &Path {
        match self {
            SyncEvent::Synced(path)
            | SyncEvent::Unmodified(path)
            | SyncEvent::Removed(path)
            | SyncEvent::BadFile { path, .. }
            | SyncEvent::Failed { path, .. } => path,
        }
    }
}

/// Counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub unmodified: usize,
    pub bad: usize,
    pub failed: usize,
    pub pruned: u64,
    /// Entries the directory walk could not read
    pub walk_errors: usize,
}

impl SyncSummary {
    pub fn record(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Synced(_) => self.synced += 1,
            SyncEvent::Unmodified(_) => self.unmodified += 1,
            SyncEvent::BadFile { .. } => self.bad += 1,
            SyncEvent::Failed { .. } => self.failed += 1,
            SyncEvent::Removed(_) => self.pruned += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.synced + self.unmodified + self.bad + self.failed
    }
}

/// How a batch is run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Tags re-applied to changed files
    pub tags: TagSelection,
    pub force: bool,
    /// Delete songs whose files are gone after a full pass
    pub prune: bool,
    /// Files reconciled at once
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            tags: SyncTag::ALL.into_iter().collect(),
            force: false,
            prune: true,
            concurrency: 10,
        }
    }
}

/// Reconcile one file and turn the outcome into an event.
pub async fn sync_file(sync: &Synchronizer, path: PathBuf, tags: &[SyncTag], force: bool) -> SyncEvent {
    let mut target = match sync.target(&path).await {
        Ok(target) => target,
        Err(e) => {
            return SyncEvent::Failed {
                path,
                error: e.to_string(),
            };
        }
    };

    match target.sync(tags, force).await {
        Ok(SyncOutcome::Success) => SyncEvent::Synced(path),
        Ok(SyncOutcome::Unmodified) => SyncEvent::Unmodified(path),
        Ok(SyncOutcome::BadFile) => SyncEvent::BadFile {
            reason: target.sync_error().unwrap_or("unreadable file").to_string(),
            path,
        },
        Err(e) => {
            tracing::warn!(target: "library", path = %path.display(), error = %e, "Sync failed");
            SyncEvent::Failed {
                path,
                error: e.to_string(),
            }
        }
    }
}

/// Stream of per-file events for every audio file under `root`, and the
/// walk error count of the underlying scan.
pub fn sync_stream(
    sync: Synchronizer,
    root: PathBuf,
    options: SyncOptions,
) -> (impl Stream<Item = SyncEvent>, ScanErrors) {
    let concurrency = options.concurrency.max(1);
    let (paths, errors) = scanner::scan(root);
    let events = paths
        .map(move |path| {
            let sync = sync.clone();
            let tags = options.tags.clone();
            let force = options.force;
            async move { sync_file(&sync, path, &tags, force).await }
        })
        .buffer_unordered(concurrency);
    (events, errors)
}

/// Reconcile everything under `root`, then prune vanished songs.
///
/// `on_event` sees every event as it happens, including removals. A root
/// that is missing or unreadable is an error and nothing is touched.
pub async fn sync_library(
    sync: &Synchronizer,
    root: &Path,
    options: &SyncOptions,
    mut on_event: impl FnMut(&SyncEvent),
) -> Result<SyncSummary> {
    let root = std::path::absolute(root)?;
    std::fs::read_dir(&root).with_context(format!("reading library root {}", root.display()))?;
    tracing::info!(target: "library", root = %root.display(), force = options.force, "Starting sync");

    let mut summary = SyncSummary::default();
    let mut seen = HashSet::new();
    let (events, walk_errors) = sync_stream(sync.clone(), root.clone(), options.clone());
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        seen.insert(TrackIdentity::of(event.path()).as_str().to_string());
        summary.record(&event);
        on_event(&event);
    }
    summary.walk_errors = walk_errors.count();

    if options.prune && summary.walk_errors > 0 {
        tracing::warn!(
            target: "library",
            root = %root.display(),
            walk_errors = summary.walk_errors,
            "Walk was incomplete, not pruning"
        );
    } else if options.prune {
        let removed = prune_missing(sync, &root, &seen).await?;
        for path in removed {
            let event = SyncEvent::Removed(path);
            summary.record(&event);
            on_event(&event);
        }
    }

    tracing::info!(
        target: "library",
        synced = summary.synced,
        unmodified = summary.unmodified,
        bad = summary.bad,
        failed = summary.failed,
        pruned = summary.pruned,
        walk_errors = summary.walk_errors,
        "Sync complete"
    );
    Ok(summary)
}

/// Delete songs under `root` whose identity is not in `seen`.
///
/// Returns the stored paths of the deleted songs.
pub async fn prune_missing(
    sync: &Synchronizer,
    root: &Path,
    seen: &HashSet<String>,
) -> Result<Vec<PathBuf>> {
    let mut prefix = root.to_string_lossy().into_owned();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }

    let pool = sync.pool();
    let mut gone = Vec::new();
    let mut paths = Vec::new();
    for id in db::song_ids_under(pool, &prefix).await? {
        if seen.contains(&id) {
            continue;
        }
        if let Some(song) = db::get_song(pool, &id).await?
            && let StorageMetadata::Local { path } = song.storage_metadata()
        {
            paths.push(PathBuf::from(path));
        }
        gone.push(id);
    }

    if gone.is_empty() {
        return Ok(paths);
    }

    let removed = db::delete_songs(pool, &gone).await?;
    let (albums, artists) = db::prune_orphans(pool).await?;
    tracing::info!(target: "library", songs = removed, albums, artists, "Pruned vanished songs");
    Ok(paths)
}

/// Apply one watcher event to the library.
pub async fn apply_watch_event(
    sync: &Synchronizer,
    event: WatchEvent,
    options: &SyncOptions,
    on_event: &mut impl FnMut(&SyncEvent),
) -> Result<()> {
    match event {
        WatchEvent::Created(path) | WatchEvent::Modified(path) => {
            let event = sync_file(sync, path, &options.tags, false).await;
            on_event(&event);
        }
        WatchEvent::Removed(path) => {
            let identity = TrackIdentity::of(&std::path::absolute(&path)?);
            if db::delete_song(sync.pool(), identity.as_str()).await? {
                db::prune_orphans(sync.pool()).await?;
                on_event(&SyncEvent::Removed(path));
            }
        }
        WatchEvent::DirCreated(dir) => {
            let options = SyncOptions {
                prune: false,
                force: false,
                ..options.clone()
            };
            let (events, _) = sync_stream(sync.clone(), dir, options);
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                on_event(&event);
            }
        }
        WatchEvent::Error(message) => {
            tracing::warn!(target: "library", error = %message, "Watcher reported an error");
        }
    }
    Ok(())
}

/// Follow `roots` until Ctrl+C, reconciling files as they change.
pub async fn watch(
    sync: &Synchronizer,
    roots: Vec<PathBuf>,
    options: &SyncOptions,
    mut on_event: impl FnMut(&SyncEvent),
) -> Result<()> {
    let (watcher, changes) = FileWatcher::new(roots)?;

    // Bridge the blocking watcher channel into the runtime
    let (tx, mut rx) = mpsc::channel(256);
    std::thread::spawn(move || {
        while let Ok(event) = changes.recv() {
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = apply_watch_event(sync, event, options, &mut on_event).await {
                    tracing::warn!(target: "library", error = %e, "Failed to apply change");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "library", "Stopping watcher");
                break;
            }
        }
    }

    drop(watcher);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cover::CoverResolver;
    use crate::metadata::{BadFile, TagSet};
    use crate::test_utils::{MockReader, mock_tag_set, temp_db, touch};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        sync: Synchronizer,
        reader: Arc<MockReader>,
        music: TempDir,
        _db_dir: TempDir,
        _covers: TempDir,
    }

    async fn fixture() -> Fixture {
        let (pool, db_dir) = temp_db().await;
        let covers = TempDir::new().unwrap();
        let reader = Arc::new(MockReader::default());
        let resolver = CoverResolver::new(covers.path(), Duration::from_secs(60));
        Fixture {
            sync: Synchronizer::new(pool, reader.clone(), resolver),
            reader,
            music: TempDir::new().unwrap(),
            _db_dir: db_dir,
            _covers: covers,
        }
    }

    impl Fixture {
        fn file(&self, rel: &str, title: &str) -> PathBuf {
            let path = self.music.path().join(rel);
            touch(&path);
            self.reader.set(
                &path,
                Ok(TagSet {
                    artist: "Band".into(),
                    album: "Album".into(),
                    title: title.into(),
                    ..mock_tag_set()
                }),
            );
            path
        }

        async fn run(&self, options: &SyncOptions) -> (SyncSummary, Vec<SyncEvent>) {
            let mut events = Vec::new();
            let summary = sync_library(&self.sync, self.music.path(), options, |e| events.push(e.clone()))
                .await
                .unwrap();
            (summary, events)
        }
    }

    #[tokio::test]
    async fn test_first_pass_syncs_everything() {
        let f = fixture().await;
        f.file("a/01.mp3", "One");
        f.file("a/02.flac", "Two");
        std::fs::write(f.music.path().join("a/notes.txt"), b"x").unwrap();

        let (summary, events) = f.run(&SyncOptions::default()).await;
        assert_eq!(summary.synced, 2);
        assert_eq!(summary.total(), 2);
        assert_eq!(events.len(), 2);
        assert_eq!(db::count_songs(f.sync.pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_second_pass_is_unmodified() {
        let f = fixture().await;
        f.file("01.mp3", "One");
        f.run(&SyncOptions::default()).await;

        let (summary, _) = f.run(&SyncOptions::default()).await;
        assert_eq!(summary.unmodified, 1);
        assert_eq!(summary.synced, 0);
    }

    #[tokio::test]
    async fn test_bad_file_does_not_stop_batch() {
        let f = fixture().await;
        f.file("01.mp3", "One");
        let broken = f.music.path().join("02.mp3");
        touch(&broken);
        f.reader.set(&broken, Err(BadFile::new("No playtime found")));

        let (summary, events) = f.run(&SyncOptions::default()).await;
        assert_eq!(summary.synced, 1);
        assert_eq!(summary.bad, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::BadFile { reason, .. } if reason == "No playtime found"
        )));
    }

    #[tokio::test]
    async fn test_vanished_files_are_pruned() {
        let f = fixture().await;
        let keep = f.file("01.mp3", "One");
        let gone = f.file("02.mp3", "Two");
        f.run(&SyncOptions::default()).await;

        std::fs::remove_file(&gone).unwrap();
        let (summary, events) = f.run(&SyncOptions::default()).await;
        assert_eq!(summary.pruned, 1);
        assert!(events.contains(&SyncEvent::Removed(gone.clone())));
        assert_eq!(db::count_songs(f.sync.pool()).await.unwrap(), 1);
        assert!(
            db::get_song(f.sync.pool(), TrackIdentity::of(&keep).as_str())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_missing_root_is_error_and_prunes_nothing() {
        let f = fixture().await;
        f.file("a/01.mp3", "One");
        f.file("a/02.mp3", "Two");
        f.run(&SyncOptions::default()).await;

        let moved = f.music.path().with_extension("unmounted");
        std::fs::rename(f.music.path(), &moved).unwrap();
        let result = sync_library(&f.sync, f.music.path(), &SyncOptions::default(), |_: &SyncEvent| {}).await;
        std::fs::rename(&moved, f.music.path()).unwrap();

        assert!(result.is_err());
        assert_eq!(db::count_songs(f.sync.pool()).await.unwrap(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_walk_errors_skip_pruning() {
        let f = fixture().await;
        f.file("01.mp3", "One");
        let gone = f.file("02.mp3", "Two");
        f.run(&SyncOptions::default()).await;

        std::fs::remove_file(&gone).unwrap();
        std::os::unix::fs::symlink("/no/such/target.mp3", f.music.path().join("03.mp3")).unwrap();

        let (summary, events) = f.run(&SyncOptions::default()).await;
        assert_eq!(summary.walk_errors, 1);
        assert_eq!(summary.pruned, 0);
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::Removed(_))));
        assert_eq!(db::count_songs(f.sync.pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_no_prune_keeps_vanished_songs() {
        let f = fixture().await;
        let gone = f.file("01.mp3", "One");
        f.run(&SyncOptions::default()).await;
        std::fs::remove_file(&gone).unwrap();

        let options = SyncOptions {
            prune: false,
            ..SyncOptions::default()
        };
        let (summary, _) = f.run(&options).await;
        assert_eq!(summary.pruned, 0);
        assert_eq!(db::count_songs(f.sync.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_watch_events() {
        let f = fixture().await;
        let options = SyncOptions::default();
        let mut seen = Vec::new();
        let mut record = |e: &SyncEvent| seen.push(e.clone());

        let path = f.file("new.mp3", "New");
        apply_watch_event(&f.sync, WatchEvent::Created(path.clone()), &options, &mut record)
            .await
            .unwrap();
        apply_watch_event(&f.sync, WatchEvent::Removed(path.clone()), &options, &mut record)
            .await
            .unwrap();
        // Removing an unknown file is silent
        apply_watch_event(&f.sync, WatchEvent::Removed(path.clone()), &options, &mut record)
            .await
            .unwrap();

        assert_eq!(seen, vec![SyncEvent::Synced(path.clone()), SyncEvent::Removed(path)]);
        assert_eq!(db::count_songs(f.sync.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_watch_new_directory_is_scanned() {
        let f = fixture().await;
        f.file("Album/01.mp3", "One");
        f.file("Album/02.mp3", "Two");

        let mut count = 0;
        apply_watch_event(
            &f.sync,
            WatchEvent::DirCreated(f.music.path().join("Album")),
            &SyncOptions::default(),
            &mut |_: &SyncEvent| count += 1,
        )
        .await
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(db::count_songs(f.sync.pool()).await.unwrap(), 2);
    }
}
