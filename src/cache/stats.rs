//! Cache Statistics Module
//!
//! Tracks cache performance counters: hits, misses, evictions, and
//! expirations.

use serde::Serialize;

// == Cache Stats ==
/// Cache performance counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads served from an unexpired entry
    pub hits: u64,
    /// Reads that found nothing usable (absent or expired)
    pub misses: u64,
    /// Entries removed to make room (LRU policy)
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Current number of live entries
    pub total_entries: usize,
}

impl CacheStats {
    /// Creates stats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 before any read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }

    // == Snapshot ==
    /// Returns a timestamped copy for diagnostics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stats: self.clone(),
            captured_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A point-in-time view of the counters, for logs and debug surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// RFC 3339 capture time
    pub captured_at: String,
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.expirations, 0);
    }

    #[test]
    fn test_hit_rate_no_reads() {
        assert_eq!(CacheStats::new().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_snapshot_carries_timestamp() {
        let mut stats = CacheStats::new();
        stats.record_hit();

        let snap = stats.snapshot();
        assert_eq!(snap.stats.hits, 1);
        assert!(!snap.captured_at.is_empty());
    }
}
