use std::path::PathBuf;
use thiserror::Error;

/// Rule file and settings problems. Never fatal: callers fall back to
/// an empty rule set or default settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules in {path}: {source}")]
    Rules {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse settings in {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize default rules: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A call into the message source failed. The action it backed counts as
/// not applied and the record stays eligible for the next pass.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{operation} failed for {target}: {message}")]
    Remote {
        operation: &'static str,
        target: String,
        message: String,
    },
}

impl SourceError {
    pub fn remote(operation: &'static str, target: impl Into<String>, err: impl ToString) -> Self {
        SourceError::Remote {
            operation,
            target: target.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
