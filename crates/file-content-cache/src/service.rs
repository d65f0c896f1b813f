//! Two-tier content cache over a durable index and blob store
//!
//! Reads go memory tier → metadata index → source. A memory hit is served
//! without touching the disk; entries reach the memory tier only after the
//! index validated them against the live source checksum, and leave it on
//! invalidation, eviction or a governor sweep. Index entries are served only
//! while the live checksum matches; blobs themselves are never re-hashed.
//! Storage failures never fail a read: the source is served directly and the
//! failure is counted.

use crate::checksum::ChecksumAlgorithm;
use crate::config::{CacheConfig, OversizePolicy};
use crate::content_store::ContentStore;
use crate::error::{CacheError, Result};
use crate::memory_governor::MemoryGovernor;
use crate::memory_tier::MemoryTier;
use crate::metadata_index::MetadataIndex;
use crate::path_validator::PathValidator;
use crate::policy::{mime_hint, Eligibility, EligibilityPolicy};
use crate::types::{
    CacheRecord, CacheStats, CleanupReport, ClearReport, CompressionStats, ContentMetadata,
    Effectiveness, Fetched, MemoryStats, Outcome, Tier, WarmupReport,
};
use crate::warmup::WarmupScheduler;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Counters {
    operations: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    bypasses: AtomicU64,
    degraded: AtomicU64,
}

pub struct CacheService {
    config: CacheConfig,
    validator: PathValidator,
    policy: EligibilityPolicy,
    store: ContentStore,
    index: MetadataIndex,
    memory: MemoryTier,
    governor: MemoryGovernor,
    counters: Counters,
}

impl CacheService {
    /// Open the cache rooted at `config.cache_dir`, creating its layout if needed
    pub async fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let validator = PathValidator::new(
            &config.security.allowed_dirs,
            config.security.validate_paths,
        );
        let policy = EligibilityPolicy::from_config(&config)?;
        let store = ContentStore::new(
            config.content_dir(),
            config.file_cache.compression_enabled,
            config.file_cache.compression_level,
        );
        tokio::fs::create_dir_all(store.root()).await?;

        let index = MetadataIndex::open(&config.index_path()).await?;
        let memory = MemoryTier::new(config.memory_cache.max_items);
        let governor = MemoryGovernor::new(
            config.eviction.max_memory_usage.bytes(),
            config.gc_interval(),
        );

        info!(
            cache_dir = %config.cache_dir.display(),
            allowed_roots = validator.roots().len(),
            memory_items = config.memory_cache.max_items,
            "Cache service opened"
        );

        Ok(Self {
            config,
            validator,
            policy,
            store,
            index,
            memory,
            governor,
            counters: Counters::default(),
        })
    }

    /// Replace the memory governor
    pub fn with_governor(mut self, governor: MemoryGovernor) -> Self {
        self.governor = governor;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn validator(&self) -> &PathValidator {
        &self.validator
    }

    pub(crate) fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    pub(crate) fn store(&self) -> &ContentStore {
        &self.store
    }

    pub(crate) fn index(&self) -> &MetadataIndex {
        &self.index
    }

    pub(crate) fn algorithm(&self) -> ChecksumAlgorithm {
        self.config.file_cache.checksum_algorithm
    }

    /// Fetch current content for `path`
    ///
    /// `Ok(None)` when the source does not exist. Paths outside the allowed
    /// roots are refused with `PathNotAllowed` before anything else happens.
    pub async fn get(&self, path: &Path) -> Result<Option<Fetched>> {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);

        let canonical = self
            .validator
            .resolve(path)
            .ok_or_else(|| CacheError::PathNotAllowed(path.to_path_buf()))?;
        let key = path_key(&canonical);

        if let Some(content) = self.memory.get(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(path = %key, "Memory tier hit");
            return Ok(Some(Fetched {
                content,
                outcome: Outcome::Hit(Tier::Memory),
            }));
        }

        let meta = match tokio::fs::metadata(&canonical).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", canonical.display()),
            )
            .into());
        }

        match self.policy.check(&canonical, meta.len()) {
            Eligibility::Eligible => {}
            Eligibility::Ineligible(reason) => return self.bypass(&canonical, reason).await,
            Eligibility::Oversize { size, limit } => {
                return self.read_oversize(&canonical, size, limit).await
            }
        }

        let live_checksum = {
            let algorithm = self.algorithm();
            let source = canonical.clone();
            match tokio::task::spawn_blocking(move || algorithm.digest_file(&source)).await? {
                Ok(sum) => sum,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        };

        let mut previous = match self.index.get(&key).await {
            Ok(record) => record,
            Err(e) => return self.degrade(&canonical, e).await,
        };

        let fresh = previous
            .as_ref()
            .filter(|r| r.checksum == live_checksum)
            .cloned();
        if let Some(record) = fresh {
            match self.serve_from_index(&key, &record).await {
                Ok(fetched) => return Ok(Some(fetched)),
                Err(CacheError::Corruption { reason, .. }) => {
                    warn!(path = %key, reason = %reason, "Corrupted cache entry, re-caching");
                    if let Err(e) = self.drop_record(&key).await {
                        return self.degrade(&canonical, e).await;
                    }
                    previous = None;
                }
                Err(e) => return self.degrade(&canonical, e).await,
            }
        }

        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        self.cache_miss(&canonical, key, modified, previous).await
    }

    async fn serve_from_index(&self, key: &str, record: &CacheRecord) -> Result<Fetched> {
        let access_count = self.index.touch(key).await?.unwrap_or(0);

        let store = self.store.clone();
        let location = record.content_location.clone();
        let compressed = record.compressed;
        let expected = record.size;
        let decoded = tokio::task::spawn_blocking(move || {
            let raw = store
                .read(&location)
                .map_err(|e| format!("unreadable blob: {}", e))?;
            let content = ContentStore::decode(raw, compressed)
                .map_err(|e| format!("undecodable blob: {}", e))?;
            if content.len() as u64 != expected {
                return Err(format!(
                    "size mismatch: recorded {} bytes, blob holds {}",
                    expected,
                    content.len()
                ));
            }
            Ok(content)
        })
        .await?;

        let content: Arc<[u8]> = decoded
            .map_err(|reason| CacheError::Corruption {
                path: key.to_string(),
                reason,
            })?
            .into();

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!(path = %key, access_count, "Index hit");

        if access_count > 1 {
            self.promote(key, content.clone());
        }

        Ok(Fetched {
            content,
            outcome: Outcome::Hit(Tier::Index),
        })
    }

    async fn cache_miss(
        &self,
        canonical: &Path,
        key: String,
        modified: DateTime<Utc>,
        previous: Option<CacheRecord>,
    ) -> Result<Option<Fetched>> {
        let content: Arc<[u8]> = match tokio::fs::read(canonical).await {
            Ok(bytes) => bytes.into(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let job = {
            let store = self.store.clone();
            let algorithm = self.algorithm();
            let content = content.clone();
            let source = canonical.to_path_buf();
            let key = key.clone();
            tokio::task::spawn_blocking(move || {
                let checksum = algorithm.digest(&content);
                store_content(&store, checksum, key, &source, &content, modified)
            })
        };

        let record = match job.await? {
            Ok(record) => record,
            Err(e) => return Ok(Some(self.degraded(content, e.to_string()))),
        };
        if let Err(e) = self.index.upsert(&record).await {
            return Ok(Some(self.degraded(content, e.to_string())));
        }

        if let Some(old) = previous.filter(|old| old.checksum != record.checksum) {
            if let Err(e) = self.release_blob(&old).await {
                warn!(path = %key, error = %e, "Failed to release superseded blob");
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            path = %key,
            size = record.size,
            compressed = record.compressed,
            "Cached file content"
        );

        Ok(Some(Fetched {
            content,
            outcome: Outcome::Miss,
        }))
    }

    fn promote(&self, key: &str, content: Arc<[u8]>) {
        let memory = self.governor.check(&self.memory);
        if memory.over_limit {
            debug!(path = %key, "Skipping promotion while over memory ceiling");
            return;
        }
        self.memory.put(key, content);
    }

    fn degraded(&self, content: Arc<[u8]>, reason: String) -> Fetched {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.counters.degraded.fetch_add(1, Ordering::Relaxed);
        warn!(reason = %reason, "Cache storage failed, serving source directly");
        Fetched {
            content,
            outcome: Outcome::Degraded(reason),
        }
    }

    async fn degrade(&self, canonical: &Path, err: CacheError) -> Result<Option<Fetched>> {
        match tokio::fs::read(canonical).await {
            Ok(bytes) => Ok(Some(self.degraded(bytes.into(), err.to_string()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn bypass(&self, canonical: &Path, reason: String) -> Result<Option<Fetched>> {
        let content = match tokio::fs::read(canonical).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
        debug!(path = %canonical.display(), reason = %reason, "Serving uncached");
        Ok(Some(Fetched {
            content: content.into(),
            outcome: Outcome::Bypassed(reason),
        }))
    }

    async fn read_oversize(
        &self,
        canonical: &Path,
        size: u64,
        limit: u64,
    ) -> Result<Option<Fetched>> {
        match self.policy.oversize_policy() {
            OversizePolicy::Uncached => {
                self.bypass(canonical, format!("file exceeds {} bytes", limit))
                    .await
            }
            OversizePolicy::Truncate => {
                let source = canonical.to_path_buf();
                let head = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
                    let mut head = Vec::new();
                    std::fs::File::open(&source)?
                        .take(limit)
                        .read_to_end(&mut head)?;
                    Ok(head)
                })
                .await?;
                let mut content = match head {
                    Ok(head) => head,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                content.extend_from_slice(truncation_marker(limit, size).as_bytes());

                self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Fetched {
                    content: content.into(),
                    outcome: Outcome::Bypassed(format!("truncated to {} bytes", limit)),
                }))
            }
        }
    }

    /// Delete the record for `key` and its blob if nothing else references it
    async fn drop_record(&self, key: &str) -> Result<()> {
        self.memory.remove(key);
        if let Some(record) = self.index.delete_by_path(key).await? {
            self.release_blob(&record).await?;
        }
        Ok(())
    }

    /// Delete the blob of a removed record once no record references its checksum
    pub(crate) async fn release_blob(&self, record: &CacheRecord) -> Result<bool> {
        if self.index.count_by_checksum(&record.checksum).await? > 0 {
            return Ok(false);
        }
        let store = self.store.clone();
        let location = record.content_location.clone();
        Ok(tokio::task::spawn_blocking(move || store.delete(&location)).await??)
    }

    /// Forget everything cached for `path`; true if anything was removed
    pub async fn invalidate(&self, path: &Path) -> Result<bool> {
        let canonical = self
            .validator
            .resolve(path)
            .ok_or_else(|| CacheError::PathNotAllowed(path.to_path_buf()))?;
        let key = path_key(&canonical);

        let in_memory = self.memory.remove(&key);
        let removed = self.index.delete_by_path(&key).await?;
        if let Some(record) = &removed {
            self.release_blob(record).await?;
        }

        info!(path = %key, removed = removed.is_some() || in_memory, "Invalidated cache entry");
        Ok(removed.is_some() || in_memory)
    }

    /// Remove records cached longer ago than `older_than` (all when `None`)
    ///
    /// The memory tier is emptied in both cases.
    pub async fn clear(&self, older_than: Option<Duration>) -> Result<ClearReport> {
        let report = self.remove_older_than(older_than).await?;
        self.memory.clear();
        info!(
            records_removed = report.records_removed,
            blobs_removed = report.blobs_removed,
            "Cleared cache"
        );
        Ok(report)
    }

    /// Remove records older than `security.maxCacheAge`
    pub async fn purge_expired(&self) -> Result<ClearReport> {
        let max_age = self.config.security.max_cache_age.duration();
        let report = self.remove_older_than(Some(max_age)).await?;
        if report.records_removed > 0 {
            info!(
                records_removed = report.records_removed,
                max_age_secs = max_age.as_secs(),
                "Purged expired cache entries"
            );
        }
        Ok(report)
    }

    async fn remove_older_than(&self, older_than: Option<Duration>) -> Result<ClearReport> {
        let cutoff = older_than.map(|age| {
            chrono::Duration::from_std(age)
                .ok()
                .and_then(|age| Utc::now().checked_sub_signed(age))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });

        let removed = self.index.delete_older_than(cutoff).await?;
        let mut released = HashSet::new();
        let mut blobs_removed = 0;
        for record in &removed {
            self.memory.remove(&record.path);
            if released.insert(record.checksum.clone()) && self.release_blob(record).await? {
                blobs_removed += 1;
            }
        }

        Ok(ClearReport {
            records_removed: removed.len() as u64,
            blobs_removed,
        })
    }

    /// Drop records whose source is gone and blobs no record references
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let mut stale_records = 0;
        for record in self.index.scan_all().await? {
            let exists = tokio::fs::try_exists(&record.path).await.unwrap_or(true);
            if exists {
                continue;
            }
            if let Err(e) = self.drop_record(&record.path).await {
                warn!(path = %record.path, error = %e, "Failed to drop stale record");
                continue;
            }
            stale_records += 1;
        }

        let referenced: HashSet<String> = self
            .index
            .scan_all()
            .await?
            .into_iter()
            .map(|r| r.content_location)
            .collect();
        let store = self.store.clone();
        let orphan_blobs = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            let mut removed = 0;
            for location in store.list_blobs()? {
                if !referenced.contains(&location) && store.delete(&location)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await??;

        info!(stale_records, orphan_blobs, "Cache cleanup finished");
        Ok(CleanupReport {
            stale_records,
            orphan_blobs,
        })
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let summary = self.index.summary().await?;
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        Ok(CacheStats {
            hits,
            misses,
            operations: self.counters.operations.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            bypasses: self.counters.bypasses.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            total_records: summary.records,
            total_size: summary.total_size,
            oldest_entry: summary.oldest,
            newest_entry: summary.newest,
            memory_items: self.memory.len(),
        })
    }

    pub async fn compression_stats(&self) -> Result<CompressionStats> {
        let records = self.index.scan_all().await?;

        let total_original_size: u64 = records.iter().map(|r| r.metadata.original_size).sum();
        let total_stored_size: u64 = records.iter().map(|r| r.metadata.stored_size).sum();
        let compressed_records = records.iter().filter(|r| r.compressed).count() as u64;
        let space_saved = total_original_size as i64 - total_stored_size as i64;

        let overall_ratio = if total_stored_size == 0 {
            1.0
        } else {
            total_original_size as f64 / total_stored_size as f64
        };
        let average_ratio = if records.is_empty() {
            1.0
        } else {
            records
                .iter()
                .map(|r| r.metadata.compression_ratio)
                .sum::<f64>()
                / records.len() as f64
        };
        let space_saved_percent = if total_original_size == 0 {
            0.0
        } else {
            space_saved as f64 / total_original_size as f64 * 100.0
        };

        Ok(CompressionStats {
            total_original_size,
            total_stored_size,
            space_saved,
            space_saved_percent,
            overall_ratio,
            average_ratio,
            compressed_records,
            effectiveness: Effectiveness::from_ratio(overall_ratio),
        })
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.governor.snapshot(&self.memory)
    }

    /// Run the memory governor against the memory tier
    pub fn enforce_memory_limit(&self) -> MemoryStats {
        self.governor.check(&self.memory)
    }

    pub async fn warm(&self, patterns: &[String]) -> Result<WarmupReport> {
        WarmupScheduler::new(self).run(patterns).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.index.ping().await
    }

    pub async fn close(&self) {
        self.index.close().await;
    }
}

pub(crate) fn path_key(canonical: &Path) -> String {
    canonical.to_string_lossy().into_owned()
}

fn truncation_marker(limit: u64, size: u64) -> String {
    format!("\n[truncated: showing {} of {} bytes]\n", limit, size)
}

/// Write the blob for `content` and build the index record
pub(crate) fn store_content(
    store: &ContentStore,
    checksum: String,
    key: String,
    source: &Path,
    content: &[u8],
    modified: DateTime<Utc>,
) -> io::Result<CacheRecord> {
    let blob = store.write(&checksum, content)?;
    let now = Utc::now();

    Ok(CacheRecord {
        path: key,
        checksum,
        size: content.len() as u64,
        source_modified: modified,
        cached_at: now,
        compressed: blob.compressed,
        access_count: 1,
        last_accessed: now,
        content_location: blob.location,
        metadata: ContentMetadata::new(content.len() as u64, blob.stored_size, mime_hint(source)),
    })
}
