//! Error types for the file content cache

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CacheError {
    /// Path is outside every allowed root, or could not be resolved.
    PathNotAllowed(PathBuf),
    /// A stored blob no longer decodes to the recorded content.
    Corruption { path: String, reason: String },
    Io(Box<std::io::Error>),
    Database(Box<sqlx::Error>),
    Migration(String),
    Config(String),
    Serialization(String),
    Task(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::PathNotAllowed(path) => {
                write!(f, "Path not allowed: {}", path.display())
            }
            CacheError::Corruption { path, reason } => {
                write!(f, "Corrupted cache entry for {}: {}", path, reason)
            }
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Database(err) => write!(f, "Database error: {}", err),
            CacheError::Migration(msg) => write!(f, "Migration error: {}", msg),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::Task(msg) => write!(f, "Worker task failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Database(Box::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for CacheError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CacheError::Migration(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CacheError::Task(err.to_string())
    }
}

impl From<globset::Error> for CacheError {
    fn from(err: globset::Error) -> Self {
        CacheError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
