//! Application-wide error types.
//!
//! Library modules return [`Result`] with the [`Error`] enum below, while
//! the CLI layer uses `anyhow` for convenient error propagation.
//!
//! A file that cannot be parsed is *not* an error here: the reconciler
//! reports it as [`SyncOutcome::BadFile`](crate::sync::SyncOutcome) so a
//! batch can skip it and carry on.

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Unknown tag name in a sync allowlist
    #[error("Unknown sync tag: {0}")]
    InvalidTag(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File watcher error
    #[error("Watch error: {0}")]
    Watch(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// True when the underlying database error is a unique-constraint hit.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            Self::WithContext { source, .. } => source.is_unique_violation(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_context() {
        let err = Error::Io(std::io::Error::other("disk full")).context("while storing album cover");
        let msg = err.to_string();
        assert!(msg.contains("while storing album cover"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidTag("bpm".into());
        assert_eq!(err.to_string(), "Unknown sync tag: bpm");
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(Error::InvalidTag("bpm".into()));
        let with_ctx = result.with_context("parsing --tags");
        assert!(with_ctx.unwrap_err().to_string().contains("parsing --tags"));
    }

    #[test]
    fn test_non_database_error_is_not_unique_violation() {
        assert!(!Error::config("bad").is_unique_violation());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_unique_violation());
    }
}
