//! Error types for the content cache daemon and client

use std::fmt;

#[derive(Debug)]
pub enum DaemonError {
    Cache(file_content_cache::CacheError),
    Io(Box<std::io::Error>),
    /// Malformed or oversized frame
    Protocol(String),
    Config(String),
    /// Daemon could not be reached or started
    Unavailable(String),
    Json(serde_json::Error),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Cache(err) => write!(f, "Cache error: {}", err),
            DaemonError::Io(err) => write!(f, "IO error: {}", err),
            DaemonError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            DaemonError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DaemonError::Unavailable(msg) => write!(f, "Daemon unavailable: {}", msg),
            DaemonError::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Cache(err) => Some(err),
            DaemonError::Io(err) => Some(err.as_ref()),
            DaemonError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<file_content_cache::CacheError> for DaemonError {
    fn from(err: file_content_cache::CacheError) -> Self {
        DaemonError::Cache(err)
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        DaemonError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(err: serde_json::Error) -> Self {
        DaemonError::Json(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for DaemonError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = DaemonError::Protocol("frame too large".to_string());
        assert_eq!(format!("{}", err), "Protocol error: frame too large");
    }

    #[test]
    fn test_unavailable_error_display() {
        let err = DaemonError::Unavailable("no pid file".to_string());
        assert_eq!(format!("{}", err), "Daemon unavailable: no pid file");
    }

    #[test]
    fn test_io_error_has_source() {
        let err = DaemonError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(std::error::Error::source(&err).is_some());
        assert!(format!("{}", err).contains("refused"));
    }

    #[test]
    fn test_cache_error_wrapped() {
        let err = DaemonError::from(file_content_cache::CacheError::Config(
            "bad level".to_string(),
        ));
        assert!(format!("{}", err).starts_with("Cache error:"));
    }
}
