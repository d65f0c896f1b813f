//! Checksum-validated two-tier file content cache
//!
//! A bounded in-process memory tier sits in front of a content-addressed blob
//! store and a SQLite metadata index. Entries are served only while the live
//! source still hashes to the checksum they were stored under.

mod checksum;
mod config;
mod content_store;
mod error;
mod memory_governor;
mod memory_tier;
mod metadata_index;
mod path_validator;
mod policy;
mod service;
mod types;
mod warmup;

pub use checksum::ChecksumAlgorithm;
pub use config::{
    default_cache_dir, parse_duration, parse_size, ByteSize, CacheConfig, DurationSpec,
    EvictionConfig, FileCacheConfig, MemoryCacheConfig, OversizePolicy, SecurityConfig,
    WarmupConfig,
};
pub use content_store::{compress, decompress, ContentStore, EncodedContent, StoredBlob};
pub use error::{CacheError, Result};
pub use memory_governor::{current_rss_bytes, MemoryGovernor};
pub use memory_tier::MemoryTier;
pub use metadata_index::MetadataIndex;
pub use path_validator::PathValidator;
pub use policy::{mime_hint, Eligibility, EligibilityPolicy};
pub use service::CacheService;
pub use types::{
    CacheRecord, CacheStats, CleanupReport, ClearReport, CompressionStats, ContentMetadata,
    Effectiveness, Fetched, IndexSummary, MemoryStats, Outcome, Tier, WarmupReport,
};
pub use warmup::{expand_patterns, WarmupScheduler};
