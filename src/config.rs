//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\music-sync\config.toml
//! - macOS: ~/Library/Application Support/music-sync/config.toml
//! - Linux: ~/.config/music-sync/config.toml
//!
//! A missing or unparsable file never stops a sync: defaults are used and a
//! warning is logged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library settings
    pub library: LibraryConfig,

    /// Database settings
    pub database: DatabaseConfig,

    /// Cover art settings
    pub covers: CoverConfig,

    /// Batch scan settings
    pub scan: ScanConfig,
}

/// Library management settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Library roots synced when no path is given on the command line
    pub paths: Vec<PathBuf>,

    /// Tags applied to changed files when `--tags` is not given
    pub sync_tags: Vec<String>,

    /// Delete songs whose files vanished from a fully scanned root
    pub prune_missing: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            sync_tags: crate::sync::SyncTag::ALL
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            prune_missing: true,
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite file (defaults to [`crate::db::DEFAULT_DB_NAME`] in the cwd)
    pub path: Option<PathBuf>,
}

/// Cover art settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverConfig {
    /// Directory album covers are written to (defaults to the user data dir)
    pub store_dir: Option<PathBuf>,

    /// How long a sidecar directory scan result is reused
    pub scan_cache_ttl_hours: u64,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            scan_cache_ttl_hours: 24,
        }
    }
}

impl CoverConfig {
    /// Sidecar scan cache lifetime.
    pub fn scan_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_cache_ttl_hours * 60 * 60)
    }

    /// Resolved cover store directory.
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".data"))
                .join("music-sync")
                .join("covers")
        })
    }
}

/// Batch scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of files reconciled concurrently
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { concurrency: 10 }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Directory holding `config.toml`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("music-sync"))
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load the config file, falling back to defaults.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!(target: "config", "No config directory on this platform, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load `path`, falling back to defaults when it is missing or invalid.
pub fn load_from(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(target: "config", path = %path.display(), "No config file, using defaults");
            return Config::default();
        }
        Err(e) => {
            tracing::warn!(target: "config", path = %path.display(), error = %e, "Unreadable config file, using defaults");
            return Config::default();
        }
    };

    match toml::from_str(&contents) {
        Ok(config) => {
            tracing::debug!(target: "config", path = %path.display(), "Loaded config");
            config
        }
        Err(e) => {
            tracing::warn!(target: "config", path = %path.display(), error = %e, "Invalid config file, using defaults");
            Config::default()
        }
    }
}

/// Save to the standard config location.
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)?;
    Ok(path)
}

/// Write `config` to `path` through a temp file and a rename.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io(dir.to_path_buf(), e))?;
    }
    let contents = toml::to_string_pretty(config)?;

    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, contents).map_err(|e| ConfigError::Io(staging.clone(), e))?;
    std::fs::rename(&staging, path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

    tracing::info!(target: "config", path = %path.display(), "Saved config");
    Ok(())
}

/// Failure to write the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No config directory on this platform")]
    NoConfigDir,

    #[error("Cannot write {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        crate::error::Error::config(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[library]"));
        assert!(toml.contains("[covers]"));
        assert!(toml.contains("[scan]"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.library.paths.push(PathBuf::from("/music"));
        config.library.sync_tags = vec!["title".into(), "lyrics".into()];
        config.covers.scan_cache_ttl_hours = 2;

        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.library.paths, vec![PathBuf::from("/music")]);
        assert_eq!(parsed.library.sync_tags, vec!["title", "lyrics"]);
        assert_eq!(parsed.covers.scan_cache_ttl(), Duration::from_secs(7200));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.scan.concurrency = 3;

        save_to(&config, &path).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(load_from(&path).scan.concurrency, 3);
    }

    #[test]
    fn test_invalid_or_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_from(&dir.path().join("missing.toml")).scan.concurrency, 10);

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan\nconcurrency = ").unwrap();
        assert_eq!(load_from(&path).scan.concurrency, 10);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
[database]
path = "/var/lib/music-sync/library.db"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/music-sync/library.db"))
        );
        assert_eq!(config.covers.scan_cache_ttl_hours, 24);
        assert_eq!(config.scan.concurrency, 10);
        assert!(config.library.prune_missing);
        assert!(config.library.sync_tags.contains(&"compilation".to_string()));
    }
}
