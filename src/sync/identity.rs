//! Change detection: which library row a file maps to and whether it moved on.

use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

/// Stable identity of a file, derived from its path only.
///
/// Moving or renaming a file produces a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackIdentity(String);

impl TrackIdentity {
    pub fn of(path: &Path) -> Self {
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a file relates to what the library already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// No song row carries this identity
    New,
    /// The stored modification time differs
    Changed,
    Unchanged,
}

impl FileState {
    pub fn classify(stored_mtime: Option<i64>, current_mtime: i64) -> Self {
        match stored_mtime {
            None => FileState::New,
            Some(stored) if stored != current_mtime => FileState::Changed,
            Some(_) => FileState::Unchanged,
        }
    }
}

/// Modification time of `path` in whole seconds since the epoch.
///
/// Some platforms fail to stat certain non-ASCII names; in that case the
/// current time is used and a warning logged.
pub fn modified_time(path: &Path) -> i64 {
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| e.to_string())
        .and_then(|t| t.duration_since(UNIX_EPOCH).map_err(|e| e.to_string()));

    match mtime {
        Ok(duration) => duration.as_secs() as i64,
        Err(e) => {
            tracing::warn!(target: "sync", path = %path.display(), error = %e, "Could not read modification time, using now");
            chrono::Utc::now().timestamp()
        }
    }
}
