//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Index record for one cached source path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Canonical absolute path of the source file
    pub path: String,
    pub checksum: String,
    /// Original size in bytes
    pub size: u64,
    pub source_modified: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
    pub compressed: bool,
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
    /// Blob location relative to the content store root
    pub content_location: String,
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub original_size: u64,
    pub stored_size: u64,
    pub compression_ratio: f64,
    pub space_saved: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ContentMetadata {
    pub fn new(original_size: u64, stored_size: u64, mime_type: Option<String>) -> Self {
        let compression_ratio = if stored_size == 0 {
            1.0
        } else {
            original_size as f64 / stored_size as f64
        };
        Self {
            original_size,
            stored_size,
            compression_ratio,
            space_saved: original_size as i64 - stored_size as i64,
            mime_type,
        }
    }
}

/// Which tier served a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Index,
}

/// How a `get` was satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Hit(Tier),
    Miss,
    /// Read directly because policy keeps the file out of the cache
    Bypassed(String),
    /// Read directly because the cache itself failed
    Degraded(String),
}

impl Outcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Outcome::Hit(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Hit(Tier::Memory) => write!(f, "memory hit"),
            Outcome::Hit(Tier::Index) => write!(f, "index hit"),
            Outcome::Miss => write!(f, "miss"),
            Outcome::Bypassed(reason) => write!(f, "bypassed ({})", reason),
            Outcome::Degraded(reason) => write!(f, "degraded ({})", reason),
        }
    }
}

/// Content returned by `CacheService::get`
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content: Arc<[u8]>,
    pub outcome: Outcome,
}

/// Counters and index summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub operations: u64,
    pub errors: u64,
    pub bypasses: u64,
    pub degraded: u64,
    pub hit_rate: f64,
    pub total_records: u64,
    pub total_size: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub memory_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effectiveness {
    Excellent,
    Good,
    Moderate,
}

impl Effectiveness {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 3.0 {
            Effectiveness::Excellent
        } else if ratio > 2.0 {
            Effectiveness::Good
        } else {
            Effectiveness::Moderate
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionStats {
    pub total_original_size: u64,
    pub total_stored_size: u64,
    pub space_saved: i64,
    pub space_saved_percent: f64,
    pub overall_ratio: f64,
    pub average_ratio: f64,
    pub compressed_records: u64,
    pub effectiveness: Effectiveness,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub resident_bytes: u64,
    pub limit_bytes: u64,
    pub percent_used: f64,
    pub over_limit: bool,
    pub memory_items: usize,
    /// Content bytes held by the memory tier
    pub memory_bytes: u64,
    pub reclamations: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmupReport {
    pub processed: usize,
    pub cached: usize,
    pub skipped_fresh: usize,
    pub errors: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub records_removed: u64,
    pub blobs_removed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub stale_records: u64,
    pub orphan_blobs: u64,
}

/// Aggregate view of the index used by stats
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub records: u64,
    pub total_size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_records, 0);
        assert!(stats.oldest_entry.is_none());
    }

    #[test]
    fn test_content_metadata_ratio() {
        let meta = ContentMetadata::new(4000, 1000, Some("text/plain".to_string()));
        assert_eq!(meta.compression_ratio, 4.0);
        assert_eq!(meta.space_saved, 3000);

        let empty = ContentMetadata::new(0, 0, None);
        assert_eq!(empty.compression_ratio, 1.0);
    }

    #[test]
    fn test_effectiveness_thresholds() {
        assert_eq!(Effectiveness::from_ratio(3.5), Effectiveness::Excellent);
        assert_eq!(Effectiveness::from_ratio(2.5), Effectiveness::Good);
        assert_eq!(Effectiveness::from_ratio(2.0), Effectiveness::Moderate);
        assert_eq!(Effectiveness::from_ratio(1.0), Effectiveness::Moderate);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::Hit(Tier::Memory)).unwrap();
        assert_eq!(json, r#"{"kind":"hit","detail":"memory"}"#);

        let json = serde_json::to_string(&Outcome::Degraded("disk full".to_string())).unwrap();
        assert!(json.contains("degraded"));
        assert!(json.contains("disk full"));
        assert!(!Outcome::Miss.is_hit());
    }

    #[test]
    fn test_warmup_report_elapsed_as_seconds() {
        let report = WarmupReport {
            processed: 3,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed"], 1.5);
    }
}
