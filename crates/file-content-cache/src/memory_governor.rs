//! Process memory ceiling for the memory tier

use crate::memory_tier::MemoryTier;
use crate::types::MemoryStats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type RssSampler = Box<dyn Fn() -> Option<u64> + Send + Sync>;

pub struct MemoryGovernor {
    limit_bytes: u64,
    interval: Duration,
    last_reclaim: Mutex<Instant>,
    reclamations: AtomicU64,
    sampler: RssSampler,
}

impl MemoryGovernor {
    pub fn new(limit_bytes: u64, interval: Duration) -> Self {
        Self::with_sampler(limit_bytes, interval, current_rss_bytes)
    }

    /// Governor reading resident memory from `sampler` instead of the OS
    pub fn with_sampler<F>(limit_bytes: u64, interval: Duration, sampler: F) -> Self
    where
        F: Fn() -> Option<u64> + Send + Sync + 'static,
    {
        Self {
            limit_bytes,
            interval,
            last_reclaim: Mutex::new(Instant::now()),
            reclamations: AtomicU64::new(0),
            sampler: Box::new(sampler),
        }
    }

    /// Sample resident memory and reclaim the tier if needed
    ///
    /// Over the ceiling the tier is emptied; otherwise its spare capacity is
    /// released once per interval.
    pub fn check(&self, tier: &MemoryTier) -> MemoryStats {
        let resident = (self.sampler)().unwrap_or(0);
        let over_limit = self.limit_bytes > 0 && resident > self.limit_bytes;

        if over_limit {
            warn!(
                resident_bytes = resident,
                limit_bytes = self.limit_bytes,
                items = tier.len(),
                "Memory ceiling exceeded, clearing memory tier"
            );
            tier.clear();
            tier.shrink();
            self.reclamations.fetch_add(1, Ordering::Relaxed);
            *self.last_reclaim.lock() = Instant::now();
        } else {
            let mut last = self.last_reclaim.lock();
            if last.elapsed() >= self.interval {
                tier.shrink();
                *last = Instant::now();
                debug!(resident_bytes = resident, "Periodic memory tier reclaim");
            }
        }

        self.stats(resident, over_limit, tier)
    }

    /// Current figures without reclaiming anything
    pub fn snapshot(&self, tier: &MemoryTier) -> MemoryStats {
        let resident = (self.sampler)().unwrap_or(0);
        let over_limit = self.limit_bytes > 0 && resident > self.limit_bytes;
        self.stats(resident, over_limit, tier)
    }

    fn stats(&self, resident: u64, over_limit: bool, tier: &MemoryTier) -> MemoryStats {
        let percent_used = if self.limit_bytes == 0 {
            0.0
        } else {
            resident as f64 / self.limit_bytes as f64 * 100.0
        };
        MemoryStats {
            resident_bytes: resident,
            limit_bytes: self.limit_bytes,
            percent_used,
            over_limit,
            memory_items: tier.len(),
            memory_bytes: tier.bytes() as u64,
            reclamations: self.reclamations.load(Ordering::Relaxed),
        }
    }
}

/// Resident set size of this process; `None` where `/proc` is unavailable
pub fn current_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(e) => {
                debug!(error = %e, "Failed to read /proc/self/status");
                return None;
            }
        };
        status
            .lines()
            .find_map(|line| line.trim_start().strip_prefix("VmRSS:"))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb.saturating_mul(1024))
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn filled_tier() -> MemoryTier {
        let tier = MemoryTier::new(10);
        for i in 0..5 {
            tier.put(&format!("k{}", i), Arc::from(&b"data"[..]));
        }
        tier
    }

    #[test]
    fn test_under_limit_keeps_entries() {
        let tier = filled_tier();
        let governor =
            MemoryGovernor::with_sampler(1000, Duration::from_secs(60), || Some(500));
        let stats = governor.check(&tier);
        assert!(!stats.over_limit);
        assert_eq!(stats.memory_items, 5);
        assert_eq!(stats.memory_bytes, 20);
        assert_eq!(stats.reclamations, 0);
        assert_eq!(stats.percent_used, 50.0);
    }

    #[test]
    fn test_over_limit_clears_tier() {
        let tier = filled_tier();
        let governor =
            MemoryGovernor::with_sampler(1000, Duration::from_secs(60), || Some(2000));
        let stats = governor.check(&tier);
        assert!(stats.over_limit);
        assert_eq!(stats.memory_items, 0);
        assert_eq!(stats.memory_bytes, 0);
        assert_eq!(stats.reclamations, 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_unavailable_rss_treated_as_zero() {
        let tier = filled_tier();
        let governor = MemoryGovernor::with_sampler(1000, Duration::from_secs(60), || None);
        let stats = governor.check(&tier);
        assert_eq!(stats.resident_bytes, 0);
        assert!(!stats.over_limit);
        assert_eq!(tier.len(), 5);
    }

    #[test]
    fn test_periodic_reclaim_keeps_entries() {
        let tier = filled_tier();
        tier.remove("k4");
        let governor = MemoryGovernor::with_sampler(1000, Duration::ZERO, || Some(10));
        governor.check(&tier);
        assert_eq!(tier.len(), 4);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_rss_on_linux() {
        if let Some(rss) = current_rss_bytes() {
            assert!(rss > 0);
        }
    }
}
