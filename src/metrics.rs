//! Cache metrics system.
//!
//! Counter-based observability for the object cache, reported through a
//! BTreeMap-backed interface.
//!
//! # Why BTreeMap over HashMap?
//!
//! BTreeMap is used instead of HashMap for several critical reasons:
//! - **Deterministic ordering**: Metrics always appear in consistent order
//! - **Reproducible output**: Essential for testing and benchmarking comparisons
//! - **Stable serialization**: JSON/CSV exports have predictable key ordering
//! - **Better debugging**: Consistent output makes logs more readable
//!
//! The performance difference (O(log n) vs O(1)) is negligible with ~10
//! metric keys, and the reporting path is never on the acquire/release hot
//! path — counters are plain integer increments inside the critical section,
//! folded into a map only when a caller asks.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};

/// Counters tracked by the cache engine.
///
/// `requests` always equals `cache_hits + recycles + scratch_grabs`: every
/// acquisition is served by a hit (including hand-offs), by recycling an
/// idle buffer under a new identity, or by grabbing an anonymous scratch
/// buffer.
#[derive(Debug, Default, Clone)]
pub struct ObjectCacheMetrics {
    /// Total acquisitions served.
    pub requests: u64,

    /// Acquisitions that found the identity cached (idle or handed off).
    pub cache_hits: u64,

    /// Acquisitions served by recycling an idle buffer under a new identity.
    pub recycles: u64,

    /// Anonymous scratch acquisitions (identity tracking bypassed).
    pub scratch_grabs: u64,

    /// Ownership transfers delivered directly to a waiting thread.
    pub handoffs: u64,

    /// Objects invalidated and discarded by an error release.
    pub discards: u64,

    /// Times a thread parked waiting for a specific owned object.
    pub object_waits: u64,

    /// Times a thread parked waiting for any idle object.
    pub pool_waits: u64,
}

impl ObjectCacheMetrics {
    pub(crate) fn record_hit(&mut self) {
        self.requests += 1;
        self.cache_hits += 1;
    }

    pub(crate) fn record_handoff_received(&mut self) {
        self.requests += 1;
        self.cache_hits += 1;
    }

    pub(crate) fn record_recycle(&mut self) {
        self.requests += 1;
        self.recycles += 1;
    }

    pub(crate) fn record_scratch(&mut self) {
        self.requests += 1;
        self.scratch_grabs += 1;
    }

    pub(crate) fn record_handoff(&mut self) {
        self.handoffs += 1;
    }

    pub(crate) fn record_discard(&mut self) {
        self.discards += 1;
    }

    pub(crate) fn record_object_wait(&mut self) {
        self.object_waits += 1;
    }

    pub(crate) fn record_pool_wait(&mut self) {
        self.pool_waits += 1;
    }

    /// Cache hit rate over identity-tracked acquisitions (scratch grabs are
    /// neither hits nor misses).
    ///
    /// # Returns
    /// A value between 0.0 and 1.0, or 0.0 before the first request.
    pub fn hit_rate(&self) -> f64 {
        let tracked = self.cache_hits + self.recycles;
        if tracked > 0 {
            self.cache_hits as f64 / tracked as f64
        } else {
            0.0
        }
    }

    /// Convert the counters to a BTreeMap for reporting.
    ///
    /// Uses BTreeMap to ensure deterministic, consistent ordering of metrics
    /// which is critical for reproducible testing and comparison results.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("requests".to_string(), self.requests as f64);
        metrics.insert("cache_hits".to_string(), self.cache_hits as f64);
        metrics.insert("cache_misses".to_string(), self.recycles as f64);
        metrics.insert("recycles".to_string(), self.recycles as f64);
        metrics.insert("scratch_grabs".to_string(), self.scratch_grabs as f64);
        metrics.insert("handoffs".to_string(), self.handoffs as f64);
        metrics.insert("discards".to_string(), self.discards as f64);
        metrics.insert("object_waits".to_string(), self.object_waits as f64);
        metrics.insert("pool_waits".to_string(), self.pool_waits as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());

        metrics
    }
}

/// Trait implemented by cache types for metrics reporting.
///
/// Provides a uniform interface for retrieving metrics from any cache
/// implementation, with BTreeMap ensuring deterministic ordering for
/// reproducible benchmarks and consistent test results.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Algorithm name for identification.
    fn algorithm_name(&self) -> &'static str;
}

impl CacheMetrics for ObjectCacheMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "PooledLRU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accounting() {
        let mut m = ObjectCacheMetrics::default();
        m.record_hit();
        m.record_recycle();
        m.record_recycle();
        m.record_scratch();
        m.record_handoff_received();

        assert_eq!(m.requests, 5);
        assert_eq!(m.cache_hits, 2);
        assert_eq!(m.recycles, 2);
        assert_eq!(m.scratch_grabs, 1);
        assert_eq!(
            m.requests,
            m.cache_hits + m.recycles + m.scratch_grabs
        );
    }

    #[test]
    fn test_hit_rate_excludes_scratch() {
        let mut m = ObjectCacheMetrics::default();
        assert_eq!(m.hit_rate(), 0.0);

        m.record_hit();
        m.record_recycle();
        m.record_scratch();
        assert!((m.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_btreemap_keys() {
        let mut m = ObjectCacheMetrics::default();
        m.record_hit();
        m.record_object_wait();

        let map = m.to_btreemap();
        assert_eq!(map.get("requests"), Some(&1.0));
        assert_eq!(map.get("cache_hits"), Some(&1.0));
        assert_eq!(map.get("object_waits"), Some(&1.0));
        assert_eq!(map.get("pool_waits"), Some(&0.0));
        assert_eq!(m.algorithm_name(), "PooledLRU");
    }
}
