//! Time-boxed caches for state that must eventually be reclaimed.
//!
//! Protocol state such as an unanswered request can stay in memory forever
//! if the other side never shows up. [`EvictionCache`] bounds that state with
//! a per-entry TTL: a background sweep removes entries that have not been
//! touched for longer than the TTL and hands their values to the owner on an
//! eviction queue, so an abandoned request still surfaces as an outcome.

mod eviction;

pub use eviction::{EvictionCache, Evictions};

/// Cache statistics for monitoring and debugging.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries removed by the TTL sweep
    pub evictions: u64,
    /// Entries currently held
    pub entries: usize,
    /// Peak entries ever held (high watermark)
    pub peak_entries: usize,
}

impl CacheStats {
    /// Hit ratio (0.0 - 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// One-line summary for logging.
    pub fn format_summary(&self) -> String {
        format!(
            "Cache: {} entries (peak {}), {:.1}% hit ratio, {} evicted",
            self.entries,
            self.peak_entries,
            self.hit_ratio() * 100.0,
            self.evictions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_ratio() {
        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_cache_stats_empty() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_ratio(), 0.0);
    }

    #[test]
    fn test_cache_stats_summary() {
        let stats = CacheStats {
            hits: 1,
            misses: 1,
            evictions: 3,
            entries: 2,
            peak_entries: 5,
        };
        assert_eq!(
            stats.format_summary(),
            "Cache: 2 entries (peak 5), 50.0% hit ratio, 3 evicted"
        );
    }
}
