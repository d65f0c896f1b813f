//! Typed cache configuration
//!
//! Loaded from `<cache_dir>/config/cache.json`. Keys are camelCase, unknown keys
//! are ignored and missing keys take their defaults. Values are validated once,
//! at load time.

use crate::checksum::ChecksumAlgorithm;
use crate::error::{CacheError, Result};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const CONFIG_FILE: &str = "config/cache.json";
const INDEX_FILE: &str = "files/index.db";
const CONTENT_DIR: &str = "files/content";

/// Default cache root: `~/.claude/cache`, or a temp-dir fallback when HOME is unset.
pub fn default_cache_dir() -> PathBuf {
    home_dir()
        .map(|home| home.join(".claude").join("cache"))
        .unwrap_or_else(|| std::env::temp_dir().join("claude-cache"))
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Top-level cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(skip)]
    pub cache_dir: PathBuf,
    pub enabled: bool,
    pub file_cache: FileCacheConfig,
    pub security: SecurityConfig,
    pub eviction: EvictionConfig,
    pub memory_cache: MemoryCacheConfig,
    pub warmup: WarmupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileCacheConfig {
    pub enabled: bool,
    pub max_file_size: ByteSize,
    pub compression_enabled: bool,
    pub compression_level: u32,
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Extension allow-list; empty admits every extension.
    pub extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub oversize_policy: OversizePolicy,
}

/// What to do with a file larger than `maxFileSize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Serve the whole file directly, never persisting it
    #[default]
    Uncached,
    /// Serve the first `maxFileSize` bytes followed by a truncation marker
    Truncate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    pub validate_paths: bool,
    pub allowed_dirs: Vec<PathBuf>,
    pub max_cache_age: DurationSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvictionConfig {
    pub max_memory_usage: ByteSize,
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryCacheConfig {
    pub max_items: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WarmupConfig {
    pub batch_size: usize,
    pub max_workers: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            enabled: true,
            file_cache: FileCacheConfig::default(),
            security: SecurityConfig::default(),
            eviction: EvictionConfig::default(),
            memory_cache: MemoryCacheConfig::default(),
            warmup: WarmupConfig::default(),
        }
    }
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size: ByteSize(10 * 1024 * 1024), // 10MB
            compression_enabled: true,
            compression_level: 6,
            checksum_algorithm: ChecksumAlgorithm::default(),
            extensions: Vec::new(),
            exclude_patterns: Vec::new(),
            oversize_policy: OversizePolicy::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let mut allowed_dirs = Vec::new();
        if let Some(home) = home_dir() {
            allowed_dirs.push(home);
        }
        allowed_dirs.push(std::env::temp_dir());

        Self {
            validate_paths: true,
            allowed_dirs,
            max_cache_age: DurationSpec(Duration::from_secs(30 * 24 * 60 * 60)), // 30 days
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_memory_usage: ByteSize(100 * 1024 * 1024), // 100MB
            check_interval_secs: 60,
        }
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self { max_items: 500 }
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_workers: None,
        }
    }
}

impl CacheConfig {
    /// Defaults rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Load `<cache_dir>/config/cache.json`, falling back to defaults when absent
    pub fn load(cache_dir: &Path) -> Result<Self> {
        let path = cache_dir.join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_json(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Configuration file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.cache_dir = cache_dir.to_path_buf();
        config.validate()?;
        debug!(cache_dir = %cache_dir.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse a JSON document; `cache_dir` keeps its default
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| CacheError::Config(format!("invalid cache.json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.file_cache.compression_level > 9 {
            return Err(CacheError::Config(format!(
                "compressionLevel must be 0-9, got {}",
                self.file_cache.compression_level
            )));
        }
        if self.memory_cache.max_items == 0 {
            return Err(CacheError::Config(
                "memoryCache.maxItems must be at least 1".to_string(),
            ));
        }
        if self.warmup.batch_size == 0 {
            return Err(CacheError::Config(
                "warmup.batchSize must be at least 1".to_string(),
            ));
        }
        if self.warmup.max_workers == Some(0) {
            return Err(CacheError::Config(
                "warmup.maxWorkers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.cache_dir.join(CONTENT_DIR)
    }

    /// Concurrent prepare tasks for warm-up: configured, or min(4, available parallelism)
    pub fn warmup_workers(&self) -> usize {
        self.warmup.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(4)
        })
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.eviction.check_interval_secs)
    }
}

/// Byte count accepting `"10MB"`-style strings or plain integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn bytes(self) -> u64 {
        self.0
    }
}

/// Duration accepting `"30d"`-style strings or plain seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSpec(pub Duration);

impl DurationSpec {
    pub fn duration(self) -> Duration {
        self.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawValue::deserialize(deserializer)? {
            RawValue::Number(n) => Ok(ByteSize(n)),
            RawValue::Text(s) => parse_size(&s).map(ByteSize).map_err(de::Error::custom),
        }
    }
}

impl<'de> Deserialize<'de> for DurationSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawValue::deserialize(deserializer)? {
            RawValue::Number(n) => Ok(DurationSpec(Duration::from_secs(n))),
            RawValue::Text(s) => parse_duration(&s)
                .map(DurationSpec)
                .map_err(de::Error::custom),
        }
    }
}

/// Parse a size string such as `10MB`, `512 KB` or `2048`
pub fn parse_size(input: &str) -> std::result::Result<u64, String> {
    const UNITS: &[(&str, u64)] = &[
        ("GB", 1024 * 1024 * 1024),
        ("MB", 1024 * 1024),
        ("KB", 1024),
        ("B", 1),
    ];

    let text = input.trim().to_ascii_uppercase();
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(unit, mult)| text.strip_suffix(unit).map(|n| (n.trim(), *mult)))
        .unwrap_or((text.as_str(), 1));

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid size {:?}", input))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid size {:?}", input));
    }
    Ok((value * multiplier as f64) as u64)
}

/// Parse a duration string such as `30d`, `12h`, `15m`, `90s` or `3600`
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    const UNITS: &[(&str, u64)] = &[("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)];

    let text = input.trim().to_ascii_lowercase();
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(unit, mult)| text.strip_suffix(unit).map(|n| (n.trim(), *mult)))
        .unwrap_or((text.as_str(), 1));

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {:?}", input))?;
    Ok(Duration::from_secs(value.saturating_mul(multiplier)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(config.file_cache.enabled);
        assert_eq!(config.file_cache.max_file_size, ByteSize(10 * 1024 * 1024));
        assert_eq!(config.file_cache.compression_level, 6);
        assert_eq!(config.file_cache.checksum_algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(config.memory_cache.max_items, 500);
        assert_eq!(config.eviction.max_memory_usage, ByteSize(100 * 1024 * 1024));
        assert_eq!(config.warmup.batch_size, 50);
        assert!(config.security.validate_paths);
        assert!(!config.security.allowed_dirs.is_empty());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("512 kb").unwrap(), 512 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert_eq!(parse_size("2048").unwrap(), 2048);
        assert_eq!(parse_size("1.5KB").unwrap(), 1536);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("-5MB").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(30 * 86_400));
        assert_eq!(parse_duration("12h").unwrap(), Duration::from_secs(12 * 3_600));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_from_json_partial_and_unknown_keys() {
        let config = CacheConfig::from_json(
            r#"{
                "fileCache": { "maxFileSize": "1MB", "extensions": [".rs"], "someFutureKey": 1 },
                "memoryCache": { "maxItems": 3 },
                "telemetry": { "enabled": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.file_cache.max_file_size, ByteSize(1024 * 1024));
        assert_eq!(config.file_cache.extensions, vec![".rs".to_string()]);
        assert!(config.file_cache.compression_enabled);
        assert_eq!(config.memory_cache.max_items, 3);
        assert_eq!(config.eviction.check_interval_secs, 60);
    }

    #[test]
    fn test_from_json_rejects_invalid_values() {
        assert!(CacheConfig::from_json(r#"{"fileCache": {"compressionLevel": 12}}"#).is_err());
        assert!(CacheConfig::from_json(r#"{"fileCache": {"checksumAlgorithm": "md5"}}"#).is_err());
        assert!(CacheConfig::from_json(r#"{"memoryCache": {"maxItems": 0}}"#).is_err());
        assert!(CacheConfig::from_json(r#"{"fileCache": {"maxFileSize": "huge"}}"#).is_err());
    }

    #[test]
    fn test_oversize_policy_parsing() {
        let config =
            CacheConfig::from_json(r#"{"fileCache": {"oversizePolicy": "truncate"}}"#).unwrap();
        assert_eq!(config.file_cache.oversize_policy, OversizePolicy::Truncate);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::load(dir.path()).unwrap();
        assert_eq!(config.cache_dir, dir.path());
        assert_eq!(config.index_path(), dir.path().join("files/index.db"));
        assert_eq!(config.content_dir(), dir.path().join("files/content"));
    }

    #[test]
    fn test_load_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(
            dir.path().join("config/cache.json"),
            r#"{"security": {"maxCacheAge": "7d"}, "warmup": {"maxWorkers": 2}}"#,
        )
        .unwrap();

        let config = CacheConfig::load(dir.path()).unwrap();
        assert_eq!(
            config.security.max_cache_age.duration(),
            Duration::from_secs(7 * 86_400)
        );
        assert_eq!(config.warmup_workers(), 2);
    }

    #[test]
    fn test_default_warmup_workers_bounded() {
        let config = CacheConfig::default();
        let workers = config.warmup_workers();
        assert!((1..=4).contains(&workers));
    }
}
