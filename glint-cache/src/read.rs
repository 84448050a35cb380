//! Cache read results carrying freshness metadata.

use std::time::Duration;

use chrono::Utc;
use glint_core::Timestamp;

use super::entry::{age_at, CacheEntry, Version};
use super::key::CacheKey;

/// Which tier served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// In-process memory tier.
    Fast,
    /// Durable tier; the entry was promoted into the fast tier on the way out.
    Durable,
}

/// Result of a cache hit.
///
/// Callers see how old the data is and where it came from, so a view can
/// render cached data immediately and still decide whether to refresh.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The cached value.
    value: T,
    /// When the value was originally stored. Promotion does not change it.
    stored_at: Timestamp,
    version: Version,
    tier: TierKind,
}

impl<T> CacheRead<T> {
    pub fn from_fast(value: T, stored_at: Timestamp, version: Version) -> Self {
        Self {
            value,
            stored_at,
            version,
            tier: TierKind::Fast,
        }
    }

    pub fn from_durable(value: T, stored_at: Timestamp, version: Version) -> Self {
        Self {
            value,
            stored_at,
            version,
            tier: TierKind::Durable,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn stored_at(&self) -> Timestamp {
        self.stored_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn tier(&self) -> TierKind {
        self.tier
    }

    pub fn was_promoted(&self) -> bool {
        self.tier == TierKind::Durable
    }

    /// Time elapsed since the value was stored.
    pub fn staleness(&self) -> Duration {
        age_at(self.stored_at, Utc::now())
    }

    /// Rebuild the full entry for this read.
    pub fn into_entry(self, key: CacheKey) -> CacheEntry<T> {
        CacheEntry::new(key, self.value, self.stored_at, self.version)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            stored_at: self.stored_at,
            version: self.version,
            tier: self.tier,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
