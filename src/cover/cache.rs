//! Time-bounded cache for sidecar directory scans.
//!
//! Scanning a directory for `cover.jpg` and friends is cheap once but adds
//! up during a bulk sync where every track of an album hits the same folder.
//! Results (including "nothing found") are remembered per directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Key-value store for scan results.
pub trait ScanCache: Send + Sync {
    /// `Some(result)` on a live hit, `None` on a miss or expired entry.
    fn get(&self, key: &str) -> Option<Option<PathBuf>>;
    /// Remember `value` for `ttl`.
    fn put(&self, key: &str, value: Option<PathBuf>, ttl: Duration);
}

/// Return the cached value for `key`, computing and storing it on a miss.
pub fn remember(
    cache: &dyn ScanCache,
    key: &str,
    ttl: Duration,
    compute: impl FnOnce() -> Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(hit) = cache.get(key) {
        tracing::trace!(target: "cover", key, "Scan cache hit");
        return hit;
    }
    let value = compute();
    cache.put(key, value.clone(), ttl);
    value
}

/// Cache key for the sidecar scan of `dir`.
pub fn scan_key(dir: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dir.to_string_lossy().as_bytes());
    hasher.update(b"_cover");
    format!("{:x}", hasher.finalize())
}

/// Entry count above which `put` drops expired entries first.
const PURGE_THRESHOLD: usize = 4096;

struct Entry {
    value: Option<PathBuf>,
    expires_at: Instant,
}

/// In-process [`ScanCache`] shared by all sync workers.
#[derive(Default)]
pub struct MemoryScanCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        retain_live(&mut self.entries.write(), Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn retain_live(entries: &mut HashMap<String, Entry>, now: Instant) {
    entries.retain(|_, e| e.expires_at > now);
}

impl ScanCache for MemoryScanCache {
    fn get(&self, key: &str) -> Option<Option<PathBuf>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    fn put(&self, key: &str, value: Option<PathBuf>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if entries.len() >= PURGE_THRESHOLD {
            retain_live(&mut entries, now);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn test_remember_computes_once() {
        let cache = MemoryScanCache::new();
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Some(PathBuf::from("/music/a/cover.jpg"))
        };

        let first = remember(&cache, "k", DAY, compute);
        let second = remember(&cache, "k", DAY, || {
            calls.set(calls.get() + 1);
            None
        });

        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_negative_result_is_cached() {
        let cache = MemoryScanCache::new();
        assert_eq!(remember(&cache, "k", DAY, || None), None);
        let again = remember(&cache, "k", DAY, || Some(PathBuf::from("late.jpg")));
        assert_eq!(again, None);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = MemoryScanCache::new();
        cache.put("k", Some(PathBuf::from("x.png")), Duration::ZERO);
        assert!(cache.get("k").is_none());

        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_scan_key_is_per_directory() {
        let a = scan_key(Path::new("/music/Album"));
        let b = scan_key(Path::new("/music/Other"));
        assert_ne!(a, b);
        assert_eq!(a, scan_key(Path::new("/music/Album")));
        assert_eq!(a.len(), 64);
    }
}
