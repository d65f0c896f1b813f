//! Batch warm-up from glob patterns

use crate::error::Result;
use crate::policy::Eligibility;
use crate::service::{path_key, store_content, CacheService};
use crate::types::{CacheRecord, WarmupReport};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use globset::GlobBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

enum Prepared {
    /// Index already holds this content
    Fresh,
    Stored {
        record: CacheRecord,
        previous: Option<CacheRecord>,
    },
}

pub struct WarmupScheduler<'a> {
    service: &'a CacheService,
    batch_size: usize,
    workers: usize,
}

impl<'a> WarmupScheduler<'a> {
    pub fn new(service: &'a CacheService) -> Self {
        let config = service.config();
        Self {
            service,
            batch_size: config.warmup.batch_size.max(1),
            workers: config.warmup_workers().max(1),
        }
    }

    pub async fn run(&self, patterns: &[String]) -> Result<WarmupReport> {
        let started = Instant::now();

        let patterns = patterns.to_vec();
        let candidates = tokio::task::spawn_blocking(move || expand_patterns(&patterns)).await??;
        let eligible = self.filter_eligible(candidates).await;
        debug!(candidates = eligible.len(), "Warm-up candidates selected");

        let mut report = WarmupReport::default();
        for chunk in eligible.chunks(self.batch_size) {
            let keys: Vec<String> = chunk.iter().map(|path| path_key(path)).collect();
            let mut known = self.service.index().get_many(&keys).await?;

            let work: Vec<(PathBuf, Option<CacheRecord>)> = chunk
                .iter()
                .zip(&keys)
                .map(|(path, key)| (path.clone(), known.remove(key)))
                .collect();
            let results: Vec<(PathBuf, Result<Prepared>)> = stream::iter(work)
                .map(|(path, previous)| async move {
                    let outcome = self.prepare(&path, previous).await;
                    (path, outcome)
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

            let mut batch = Vec::new();
            let mut superseded = Vec::new();
            for (path, outcome) in results {
                report.processed += 1;
                match outcome {
                    Ok(Prepared::Fresh) => {
                        report.cached += 1;
                        report.skipped_fresh += 1;
                    }
                    Ok(Prepared::Stored { record, previous }) => {
                        if let Some(old) = previous.filter(|old| old.checksum != record.checksum) {
                            superseded.push(old);
                        }
                        batch.push(record);
                    }
                    Err(e) => {
                        report.errors += 1;
                        warn!(path = %path.display(), error = %e, "Failed to prepare file for warm-up");
                    }
                }
            }

            if batch.is_empty() {
                continue;
            }
            match self.service.index().upsert_many(&batch).await {
                Ok(()) => {
                    report.cached += batch.len();
                    for old in &superseded {
                        if let Err(e) = self.service.release_blob(old).await {
                            warn!(path = %old.path, error = %e, "Failed to release superseded blob");
                        }
                    }
                }
                Err(e) => {
                    report.errors += batch.len();
                    warn!(records = batch.len(), error = %e, "Failed to flush warm-up batch");
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            processed = report.processed,
            cached = report.cached,
            skipped_fresh = report.skipped_fresh,
            errors = report.errors,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Warm-up finished"
        );
        Ok(report)
    }

    /// Canonical, allowed, policy-eligible candidates; nothing else is opened
    async fn filter_eligible(&self, candidates: BTreeSet<PathBuf>) -> Vec<PathBuf> {
        let mut eligible = BTreeSet::new();
        for path in candidates {
            let Some(canonical) = self.service.validator().resolve(&path) else {
                debug!(path = %path.display(), "Skipping path outside allowed roots");
                continue;
            };
            let size = match tokio::fs::metadata(&canonical).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => continue,
            };
            if self.service.policy().check(&canonical, size) == Eligibility::Eligible {
                eligible.insert(canonical);
            }
        }
        eligible.into_iter().collect()
    }

    /// Read and hash one file; `previous` is its index record, looked up by the caller
    async fn prepare(&self, path: &Path, previous: Option<CacheRecord>) -> Result<Prepared> {
        let key = path_key(path);
        let algorithm = self.service.algorithm();

        let source = path.to_path_buf();
        let (content, checksum, modified) =
            tokio::task::spawn_blocking(move || -> std::io::Result<_> {
                let content = std::fs::read(&source)?;
                let modified = std::fs::metadata(&source)?
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let checksum = algorithm.digest(&content);
                Ok((content, checksum, modified))
            })
            .await??;

        if previous.as_ref().map(|r| r.checksum == checksum).unwrap_or(false) {
            return Ok(Prepared::Fresh);
        }

        let store = self.service.store().clone();
        let source = path.to_path_buf();
        let record = tokio::task::spawn_blocking(move || {
            store_content(&store, checksum, key, &source, &content, modified)
        })
        .await??;

        Ok(Prepared::Stored { record, previous })
    }
}

/// Expand glob patterns into a de-duplicated set of existing files
///
/// Relative patterns resolve against the working directory. `*` does not
/// cross directory separators; the walk is recursive only for `**`.
pub fn expand_patterns(patterns: &[String]) -> Result<BTreeSet<PathBuf>> {
    let cwd = std::env::current_dir()?;
    let mut files = BTreeSet::new();

    for pattern in patterns {
        let absolute = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            cwd.join(pattern)
        };
        let (base, depth) = split_pattern(&absolute);

        let Some(depth) = depth else {
            // No wildcards: a literal file path
            if absolute.is_file() {
                files.insert(absolute);
            }
            continue;
        };

        let matcher = GlobBuilder::new(&absolute.to_string_lossy())
            .literal_separator(true)
            .build()?
            .compile_matcher();

        let mut walker = WalkDir::new(&base).follow_links(false);
        if let Some(depth) = depth {
            walker = walker.max_depth(depth);
        }
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && matcher.is_match(entry.path()) {
                files.insert(entry.path().to_path_buf());
            }
        }
    }

    Ok(files)
}

/// Literal directory prefix of a pattern and the walk depth below it
///
/// Depth is `None` (outer) when the pattern has no wildcard at all, and
/// `Some(None)` when it contains `**` and must be walked without limit.
fn split_pattern(pattern: &Path) -> (PathBuf, Option<Option<usize>>) {
    let mut base = PathBuf::new();
    let mut rest = Vec::new();
    for component in pattern.components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !has_glob_meta(&text) {
            base.push(component.as_os_str());
        } else {
            rest.push(text.into_owned());
        }
    }

    if rest.is_empty() {
        return (base, None);
    }
    if rest.iter().any(|part| part.contains("**")) {
        return (base, Some(None));
    }
    (base, Some(Some(rest.len())))
}

fn has_glob_meta(text: &str) -> bool {
    text.contains(['*', '?', '[', '{'])
}
