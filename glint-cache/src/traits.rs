//! Cache tier traits and the cacheable marker.

use async_trait::async_trait;
use glint_core::GlintResult;
use serde::{de::DeserializeOwned, Serialize};

use super::entry::DurableRecord;
use super::key::CacheKey;

/// Marker trait for values that can be cached.
///
/// The fast tier keeps values as-is; the durable tier stores them as JSON.
/// Implemented for every type meeting the bounds.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Slow, persistent secondary tier.
///
/// Implementations store encoded [`DurableRecord`]s by key. They may be
/// capacity-bounded; a full tier reports
/// [`CacheError::CapacityExceeded`](glint_core::CacheError::CapacityExceeded)
/// from `put`, which the tiered cache absorbs.
#[async_trait]
pub trait DurableTier: Send + Sync {
    /// Get a record, or `None` if absent.
    async fn get(&self, key: &CacheKey) -> GlintResult<Option<DurableRecord>>;

    /// Insert or overwrite a record.
    async fn put(&self, key: &CacheKey, record: &DurableRecord) -> GlintResult<()>;

    /// Remove one key. Returns whether it existed.
    async fn remove(&self, key: &CacheKey) -> GlintResult<bool>;

    /// Remove every key equal to or starting with `prefix`, returning the
    /// removed keys.
    async fn remove_prefix(&self, prefix: &str) -> GlintResult<Vec<CacheKey>>;

    /// Number of stored records.
    async fn len(&self) -> GlintResult<u64>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served by the fast tier.
    pub fast_hits: u64,
    /// Reads served by the durable tier (and promoted).
    pub durable_hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Entries evicted because their TTL elapsed.
    pub expirations: u64,
    /// Durable writes dropped (capacity, I/O, serialization).
    pub durable_write_failures: u64,
    /// Keys removed by invalidation.
    pub invalidated: u64,
    /// Entries currently in the fast tier.
    pub fast_entries: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.fast_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            fast_hits: 60,
            durable_hits: 20,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
