//! Song storage backends and path-scheme addressing.
//!
//! A song's `path` column holds either a local filesystem path or a URL-like
//! key for a cloud backend. The `storage` column names the backend:
//!
//! | storage     | path format             |
//! |-------------|-------------------------|
//! | `local`     | `/music/Foo/01 Bar.mp3` |
//! | `s3`        | `s3://bucket/key`       |
//! | `s3-legacy` | `s3://bucket/key`       |
//! | `dropbox`   | `dropbox://key`         |
//!
//! Only local files are reconciled by [`crate::sync`]; the other variants are
//! parsed so callers can route playback to the right backend.

use std::fmt;
use std::str::FromStr;

/// Storage backend tag stored on every song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    #[default]
    Local,
    S3,
    S3Legacy,
    Dropbox,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "local",
            StorageType::S3 => "s3",
            StorageType::S3Legacy => "s3-legacy",
            StorageType::Dropbox => "dropbox",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = crate::error::Error;

    /// An empty tag means local storage.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "local" => Ok(StorageType::Local),
            "s3" => Ok(StorageType::S3),
            "s3-legacy" => Ok(StorageType::S3Legacy),
            "dropbox" => Ok(StorageType::Dropbox),
            other => Err(crate::error::Error::config(format!(
                "invalid storage type: {other}"
            ))),
        }
    }
}

/// Where a song's bytes actually live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMetadata {
    Local { path: String },
    S3Compatible { bucket: String, key: String },
    LegacyS3 { bucket: String, key: String },
    Dropbox { key: String },
}

impl StorageMetadata {
    /// Resolve the storage location of a song row.
    ///
    /// Anything that fails to parse is treated as a local path.
    pub fn from_song(storage: &str, path: &str) -> Self {
        let parsed = match storage.parse::<StorageType>() {
            Ok(StorageType::S3) => {
                s3_params(path).map(|(bucket, key)| StorageMetadata::S3Compatible { bucket, key })
            }
            Ok(StorageType::S3Legacy) => {
                s3_params(path).map(|(bucket, key)| StorageMetadata::LegacyS3 { bucket, key })
            }
            Ok(StorageType::Dropbox) => path
                .strip_prefix("dropbox://")
                .filter(|key| !key.is_empty())
                .map(|key| StorageMetadata::Dropbox {
                    key: key.to_string(),
                }),
            Ok(StorageType::Local) | Err(_) => None,
        };

        parsed.unwrap_or_else(|| StorageMetadata::Local {
            path: path.to_string(),
        })
    }

    /// The backend-relative path (file path, object key, or Dropbox key).
    pub fn path(&self) -> &str {
        match self {
            StorageMetadata::Local { path } => path,
            StorageMetadata::S3Compatible { key, .. }
            | StorageMetadata::LegacyS3 { key, .. }
            | StorageMetadata::Dropbox { key } => key,
        }
    }
}

/// Split an `s3://bucket/key` (or `s3+://bucket/key`) path into bucket and key.
pub fn s3_params(path: &str) -> Option<(String, String)> {
    let rest = path
        .strip_prefix("s3://")
        .or_else(|| path.strip_prefix("s3+://"))?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}

/// Build the stored path for an object in a bucket.
pub fn s3_path(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_parse() {
        assert_eq!("".parse::<StorageType>().unwrap(), StorageType::Local);
        assert_eq!("s3-legacy".parse::<StorageType>().unwrap(), StorageType::S3Legacy);
        assert!("ftp".parse::<StorageType>().is_err());
    }

    #[test]
    fn test_s3_params() {
        assert_eq!(
            s3_params("s3://bucket/dir/song.mp3"),
            Some(("bucket".to_string(), "dir/song.mp3".to_string()))
        );
        assert_eq!(
            s3_params("s3+://bucket/song.mp3"),
            Some(("bucket".to_string(), "song.mp3".to_string()))
        );
        assert_eq!(s3_params("/local/song.mp3"), None);
        assert_eq!(s3_params("s3://bucket-only"), None);
    }

    #[test]
    fn test_s3_path_roundtrip() {
        let path = s3_path("media", "u1/song.flac");
        assert_eq!(path, "s3://media/u1/song.flac");
        assert_eq!(
            StorageMetadata::from_song("s3", &path),
            StorageMetadata::S3Compatible {
                bucket: "media".into(),
                key: "u1/song.flac".into()
            }
        );
    }

    #[test]
    fn test_dropbox_metadata() {
        let meta = StorageMetadata::from_song("dropbox", "dropbox://abc/def.mp3");
        assert_eq!(meta.path(), "abc/def.mp3");
    }

    #[test]
    fn test_unparsable_falls_back_to_local() {
        let meta = StorageMetadata::from_song("s3", "not-a-url");
        assert_eq!(
            meta,
            StorageMetadata::Local {
                path: "not-a-url".into()
            }
        );
        let meta = StorageMetadata::from_song("weird", "/music/a.mp3");
        assert_eq!(meta.path(), "/music/a.mp3");
    }
}
