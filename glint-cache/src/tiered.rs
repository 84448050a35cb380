//! Two-tier cache: a fast in-process map in front of a durable tier.
//!
//! Reads go fast tier first, then durable. A durable hit is promoted into the
//! fast tier with its original `stored_at`, so promotion never extends an
//! entry's life. Expired entries are never returned; the read that finds one
//! evicts it from both tiers.
//!
//! Durable writes are best-effort. A failed write (serialization, a full
//! tier, I/O) is logged and counted; the fast tier keeps serving the value.
//!
//! # Invalidation
//!
//! `invalidate` clears the fast tier and records a tombstone under the same
//! lock before touching the durable tier. A durable read that began before
//! the invalidation and carries a record stored no later than the tombstone
//! is refused at promotion time, so it cannot put the entry back.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use glint_core::{CacheError, CacheSettings, GlintError, GlintResult, Timestamp};

use crate::durable::{LmdbDurableTier, MemoryDurableTier};
use crate::entry::{is_expired, DurableRecord, Version};
use crate::key::{CacheKey, Namespace};
use crate::read::CacheRead;
use crate::traits::{CacheStats, Cacheable, DurableTier};

/// A fast-tier value. Stored type-erased so one cache holds every payload
/// type; reading it back as another type is a miss.
struct MemorySlot {
    stored_at: Timestamp,
    version: Version,
    value: Arc<dyn Any + Send + Sync>,
}

/// Marks keys removed at `at`. Durable records stored no later than `at`
/// under a matching key are stale.
#[derive(Debug, Clone)]
struct Tombstone {
    prefix: String,
    exact: bool,
    at: Timestamp,
}

impl Tombstone {
    fn covers(&self, key: &CacheKey, stored_at: Timestamp) -> bool {
        let matches = if self.exact {
            key.as_str() == self.prefix
        } else {
            key.has_prefix(&self.prefix)
        };
        matches && stored_at <= self.at
    }
}

#[derive(Default)]
struct FastTier {
    entries: HashMap<String, MemorySlot>,
    tombstones: Vec<Tombstone>,
}

impl FastTier {
    fn is_tombstoned(&self, key: &CacheKey, stored_at: Timestamp) -> bool {
        self.tombstones.iter().any(|t| t.covers(key, stored_at))
    }

    /// Tombstones older than the TTL guard nothing: every record they
    /// cover has expired on its own.
    fn prune_tombstones(&mut self, ttl: Duration, now: Timestamp) {
        self.tombstones.retain(|t| !is_expired(t.at, ttl, now));
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    fast_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    durable_write_failures: AtomicU64,
    invalidated: AtomicU64,
}

enum FastLookup<T> {
    Hit(CacheRead<T>),
    Expired,
    WrongType,
    Absent,
}

/// Key/value cache with TTL expiry and namespaced invalidation.
///
/// # Example
///
/// ```ignore
/// let cache = TieredCache::in_memory(Duration::from_secs(600));
/// let key = Namespace::new("list").scoped(parent).key("items");
///
/// cache.set(&key, items.clone(), None).await?;
/// let read = cache.get::<Vec<Item>>(&key).await?;
/// ```
pub struct TieredCache {
    fast: RwLock<FastTier>,
    durable: Arc<dyn DurableTier>,
    ttl: Duration,
    metrics: CacheMetrics,
}

impl TieredCache {
    pub fn new(durable: Arc<dyn DurableTier>, ttl: Duration) -> Self {
        Self {
            fast: RwLock::new(FastTier::default()),
            durable,
            ttl,
            metrics: CacheMetrics::default(),
        }
    }

    /// Cache whose durable tier is an unbounded in-memory map.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryDurableTier::unbounded()), ttl)
    }

    /// Build a cache from settings: LMDB when a directory is configured,
    /// otherwise a byte-bounded in-memory durable tier.
    pub fn from_settings(settings: &CacheSettings) -> GlintResult<Self> {
        let max_bytes = settings.durable_max_size_bytes();
        let durable: Arc<dyn DurableTier> = match &settings.durable_path {
            Some(path) => Arc::new(LmdbDurableTier::new(path, max_bytes)?),
            None => Arc::new(MemoryDurableTier::new(max_bytes)),
        };
        Ok(Self::new(durable, settings.ttl()))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn durable(&self) -> &Arc<dyn DurableTier> {
        &self.durable
    }

    /// Look up `key`, fast tier first.
    pub async fn get<T: Cacheable>(&self, key: &CacheKey) -> GlintResult<Option<CacheRead<T>>> {
        let now = Utc::now();

        match self.lookup_fast::<T>(key, now)? {
            FastLookup::Hit(read) => {
                self.metrics.fast_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Fast tier hit");
                return Ok(Some(read));
            }
            FastLookup::Expired => {
                self.evict_expired(key, now).await?;
                return Ok(None);
            }
            FastLookup::WrongType => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Cached value has a different type");
                return Ok(None);
            }
            FastLookup::Absent => {}
        }

        let record = match self.durable.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(GlintError::Cache(CacheError::Deserialization { reason, .. })) => {
                tracing::warn!(key = %key, reason = %reason, "Dropping corrupt durable record");
                self.remove_durable_quietly(key).await;
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Durable tier read failed");
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if is_expired(record.stored_at, self.ttl, now) {
            self.evict_expired(key, now).await?;
            return Ok(None);
        }

        let value: T = match serde_json::from_slice(&record.body) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Durable record does not decode as requested type");
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        self.promote(key, value, &record, now)
    }

    /// Store `value` under `key` with the current time.
    pub async fn set<T: Cacheable>(
        &self,
        key: &CacheKey,
        value: T,
        version: Option<Version>,
    ) -> GlintResult<()> {
        self.set_at(key, value, Utc::now(), version).await
    }

    /// Store `value` with an explicit store time. An entry stored in the past
    /// expires that much sooner.
    pub async fn set_at<T: Cacheable>(
        &self,
        key: &CacheKey,
        value: T,
        stored_at: Timestamp,
        version: Option<Version>,
    ) -> GlintResult<()> {
        let version = version.unwrap_or_else(|| Version::from_timestamp(stored_at));
        let body = serde_json::to_vec(&value);

        {
            let mut fast = self.fast.write().map_err(|_| CacheError::LockPoisoned)?;
            fast.entries.insert(
                key.as_str().to_string(),
                MemorySlot {
                    stored_at,
                    version,
                    value: Arc::new(value),
                },
            );
        }

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                self.metrics
                    .durable_write_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Value not serializable, kept in fast tier only");
                return Ok(());
            }
        };

        let record = DurableRecord::new(stored_at, version, body);
        if let Err(e) = self.durable.put(key, &record).await {
            self.metrics
                .durable_write_failures
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                key = %key,
                bytes = record.encoded_len(),
                error = %e,
                "Durable tier write dropped"
            );
        }

        Ok(())
    }

    /// Remove every key equal to or starting with `prefix` from both tiers.
    /// Returns the number of distinct keys removed.
    pub async fn invalidate(&self, prefix: &str) -> GlintResult<u64> {
        let now = Utc::now();

        let mut removed: HashSet<String> = {
            let mut fast = self.fast.write().map_err(|_| CacheError::LockPoisoned)?;
            let keys: Vec<String> = fast
                .entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            for key in &keys {
                fast.entries.remove(key);
            }
            fast.prune_tombstones(self.ttl, now);
            fast.tombstones.push(Tombstone {
                prefix: prefix.to_string(),
                exact: false,
                at: now,
            });
            keys.into_iter().collect()
        };

        match self.durable.remove_prefix(prefix).await {
            Ok(keys) => removed.extend(keys.into_iter().map(|k| k.to_string())),
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "Durable tier invalidation failed");
            }
        }

        let count = removed.len() as u64;
        self.metrics.invalidated.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(prefix = %prefix, removed = count, "Invalidated cache prefix");
        Ok(count)
    }

    pub async fn invalidate_namespace(&self, namespace: &Namespace) -> GlintResult<u64> {
        self.invalidate(namespace.as_prefix()).await
    }

    /// Remove a single key from both tiers. Returns whether either tier held it.
    pub async fn remove(&self, key: &CacheKey) -> GlintResult<bool> {
        let now = Utc::now();

        let in_fast = {
            let mut fast = self.fast.write().map_err(|_| CacheError::LockPoisoned)?;
            fast.prune_tombstones(self.ttl, now);
            fast.tombstones.push(Tombstone {
                prefix: key.as_str().to_string(),
                exact: true,
                at: now,
            });
            fast.entries.remove(key.as_str()).is_some()
        };

        let in_durable = match self.durable.remove(key).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Durable tier remove failed");
                false
            }
        };

        Ok(in_fast || in_durable)
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let fast_entries = self
            .fast
            .read()
            .map(|fast| fast.entries.len() as u64)
            .unwrap_or(0);

        CacheStats {
            fast_hits: self.metrics.fast_hits.load(Ordering::Relaxed),
            durable_hits: self.metrics.durable_hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            expirations: self.metrics.expirations.load(Ordering::Relaxed),
            durable_write_failures: self.metrics.durable_write_failures.load(Ordering::Relaxed),
            invalidated: self.metrics.invalidated.load(Ordering::Relaxed),
            fast_entries,
        }
    }

    fn lookup_fast<T: Cacheable>(&self, key: &CacheKey, now: Timestamp) -> GlintResult<FastLookup<T>> {
        let fast = self.fast.read().map_err(|_| CacheError::LockPoisoned)?;
        let lookup = match fast.entries.get(key.as_str()) {
            None => FastLookup::Absent,
            Some(slot) if is_expired(slot.stored_at, self.ttl, now) => FastLookup::Expired,
            Some(slot) => match slot.value.downcast_ref::<T>() {
                Some(value) => FastLookup::Hit(CacheRead::from_fast(
                    value.clone(),
                    slot.stored_at,
                    slot.version,
                )),
                None => FastLookup::WrongType,
            },
        };
        Ok(lookup)
    }

    /// Install a durable hit in the fast tier, unless an invalidation or a
    /// newer write got there first.
    fn promote<T: Cacheable>(
        &self,
        key: &CacheKey,
        value: T,
        record: &DurableRecord,
        now: Timestamp,
    ) -> GlintResult<Option<CacheRead<T>>> {
        let mut fast = self.fast.write().map_err(|_| CacheError::LockPoisoned)?;

        if fast.is_tombstoned(key, record.stored_at) {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "Durable record invalidated while reading");
            return Ok(None);
        }

        if let Some(existing) = fast.entries.get(key.as_str()) {
            if existing.stored_at >= record.stored_at && !is_expired(existing.stored_at, self.ttl, now) {
                if let Some(current) = existing.value.downcast_ref::<T>() {
                    self.metrics.fast_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(CacheRead::from_fast(
                        current.clone(),
                        existing.stored_at,
                        existing.version,
                    )));
                }
            }
        }

        fast.entries.insert(
            key.as_str().to_string(),
            MemorySlot {
                stored_at: record.stored_at,
                version: record.version,
                value: Arc::new(value.clone()),
            },
        );
        drop(fast);

        self.metrics.durable_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, version = record.version.get(), "Promoted durable hit");
        Ok(Some(CacheRead::from_durable(value, record.stored_at, record.version)))
    }

    async fn evict_expired(&self, key: &CacheKey, now: Timestamp) -> GlintResult<()> {
        {
            let mut fast = self.fast.write().map_err(|_| CacheError::LockPoisoned)?;
            let still_expired = fast
                .entries
                .get(key.as_str())
                .map(|slot| is_expired(slot.stored_at, self.ttl, now))
                .unwrap_or(false);
            if still_expired {
                fast.entries.remove(key.as_str());
            }
        }
        self.remove_durable_quietly(key).await;

        self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, "Evicted expired entry");
        Ok(())
    }

    async fn remove_durable_quietly(&self, key: &CacheKey) {
        if let Err(e) = self.durable.remove(key).await {
            tracing::warn!(key = %key, error = %e, "Durable tier remove failed");
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
