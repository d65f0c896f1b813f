//! Core types for the content cache daemon

use file_content_cache::{default_cache_dir, CacheStats, CompressionStats, MemoryStats};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 19847;
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Runtime settings for the daemon and its client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub cache_dir: PathBuf,
    pub port: u16,
    pub max_connections: usize,
    pub read_timeout: Duration,
    /// `None` waits for a connection slot indefinitely
    pub admission_timeout: Option<Duration>,
    pub pid_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            admission_timeout: None,
            pid_file: default_pid_file(),
        }
    }
}

impl DaemonConfig {
    /// Settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings from `lookup`, falling back to defaults for missing or unparsable values
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cache_dir = lookup("CACHE_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let port = lookup("PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let max_connections = lookup("MAX_CONNECTIONS")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);

        let read_timeout = lookup("READ_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.read_timeout);

        let admission_timeout = lookup("ADMISSION_TIMEOUT_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis);

        let pid_file = lookup("PID_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.pid_file);

        Self {
            cache_dir,
            port,
            max_connections,
            read_timeout,
            admission_timeout,
            pid_file,
        }
    }
}

/// `~/.claude/cache_daemon.pid`, or a temp-dir fallback when HOME is unset
pub fn default_pid_file() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(|home| PathBuf::from(home).join(".claude").join("cache_daemon.pid"))
        .unwrap_or_else(|| std::env::temp_dir().join("cache_daemon.pid"))
}

/// Request counters for the running daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStats {
    pub active_connections: usize,
    pub max_connections: usize,
    pub requests_served: u64,
    pub cache_hits: u64,
    pub hit_rate: f64,
    pub errors: u64,
    /// Seconds
    pub avg_response_time: f64,
    pub uptime_secs: i64,
}

/// Payload of `cache_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub server: ServerStats,
    pub cache: CacheStats,
    pub compression: CompressionStats,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHealth {
    pub active_connections: usize,
    pub connection_utilization: f64,
    pub avg_response_time: f64,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealth {
    pub database_accessible: bool,
    pub cache_directory_exists: bool,
}

/// Payload of `cache_health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub server: ServerHealth,
    pub cache: StorageHealth,
    pub memory: MemoryStats,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let config = DaemonConfig::from_lookup(|_| None);
        assert_eq!(config.port, 19847);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert!(config.admission_timeout.is_none());
        assert!(config.pid_file.ends_with("cache_daemon.pid"));
    }

    #[test]
    fn test_environment_overrides() {
        let config = DaemonConfig::from_lookup(lookup_from(&[
            ("CACHE_DIR", "/tmp/cc"),
            ("PORT", "20000"),
            ("MAX_CONNECTIONS", "4"),
            ("READ_TIMEOUT_SECS", "5"),
            ("ADMISSION_TIMEOUT_MS", "250"),
            ("PID_FILE", "/tmp/cc.pid"),
        ]));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/cc"));
        assert_eq!(config.port, 20000);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.admission_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.pid_file, PathBuf::from("/tmp/cc.pid"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = DaemonConfig::from_lookup(lookup_from(&[
            ("PORT", "not-a-port"),
            ("MAX_CONNECTIONS", "0"),
            ("READ_TIMEOUT_SECS", "-3"),
        ]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
