//! Per-cache counters.
//!
//! Each [`LocalCache`](crate::LocalCache) pipeline (configuration records and
//! authorization sets) owns one [`CacheMetrics`]. Counters are plain
//! `AtomicU64`s updated with `Ordering::Relaxed`: every counter is independent
//! and monotonic, and a [`CacheMetricsSnapshot`] is telemetry, not a
//! point-in-time transaction across counters.
//!
//! ```
//! use paygate_resolver::metrics::CacheMetrics;
//!
//! let metrics = CacheMetrics::new();
//! metrics.record_hit();
//! metrics.record_miss();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.hits, 1);
//! assert_eq!(snapshot.hit_rate(), 50.0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one cache pipeline.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_errors: AtomicU64,
    cold_start_timeouts: AtomicU64,
    discarded_loads: AtomicU64,
    evictions: AtomicU64,
}

macro_rules! counter {
    ($($(#[$meta:meta])* $record:ident => $field:ident),* $(,)?) => {
        impl CacheMetrics {
            $(
                $(#[$meta])*
                #[inline]
                pub fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    /// A lookup served a positive entry.
    record_hit => hits,
    /// A lookup served a negative entry.
    record_negative_hit => negative_hits,
    /// A lookup found no entry.
    record_miss => misses,
    /// A loader ran against the backing store.
    record_load => loads,
    /// A loader failed; nothing was cached.
    record_load_error => load_errors,
    /// A lock wait or load exceeded its time bound.
    record_cold_start_timeout => cold_start_timeouts,
    /// A load finished after an invalidation and was not cached.
    record_discarded_load => discarded_loads,
}

impl CacheMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` explicit evictions.
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_errors: self.load_errors.load(Ordering::Relaxed),
            cold_start_timeouts: self.cold_start_timeouts.load(Ordering::Relaxed),
            discarded_loads: self.discarded_loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    /// Lookups served by a positive entry.
    pub hits: u64,
    /// Lookups served by a negative entry.
    pub negative_hits: u64,
    /// Lookups that found no entry.
    pub misses: u64,
    /// Loader invocations.
    pub loads: u64,
    /// Loader invocations that failed.
    pub load_errors: u64,
    /// Lock waits or loads that exceeded their bound.
    pub cold_start_timeouts: u64,
    /// Loads whose result was returned but not cached.
    pub discarded_loads: u64,
    /// Entries removed by explicit invalidation.
    pub evictions: u64,
}

impl CacheMetricsSnapshot {
    /// Percentage of lookups served from cache, positive or negative.
    ///
    /// Returns `0.0` when no lookups have been recorded.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.negative_hits;
        let total = served + self.misses;
        if total == 0 {
            return 0.0;
        }
        (served as f64 / total as f64) * 100.0
    }
}

/// Metrics for both resolver pipelines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverMetricsSnapshot {
    /// Configuration-record cache.
    pub config: CacheMetricsSnapshot,
    /// Authorization-set cache.
    pub authz: CacheMetricsSnapshot,
}
