//! Two-tier cache with TTL expiry and namespaced invalidation.
//!
//! A fast in-process tier sits in front of a durable tier (LMDB, or a
//! bounded in-memory map when no directory is configured). The durable tier
//! lets a restarted process show data without a full re-fetch; the fast tier
//! is authoritative for freshness while the process lives.
//!
//! Reads return [`CacheRead<T>`], which carries the original store time and
//! the tier that served it, so callers can render cached data immediately
//! and still decide whether to refresh.
//!
//! # Example
//!
//! ```ignore
//! let cache = TieredCache::from_settings(&config.cache)?;
//! let ns = Namespace::new("list").scoped(parent);
//!
//! cache.set(&ns.key("items"), items, None).await?;
//! if let Some(read) = cache.get::<Vec<Item<Meta, Shot>>>(&ns.key("items")).await? {
//!     render(read.value());
//! }
//!
//! // After a mutation on the server:
//! cache.invalidate_namespace(&ns).await?;
//! ```

pub mod durable;
pub mod entry;
pub mod key;
pub mod read;
pub mod tiered;
pub mod traits;

pub use durable::{LmdbDurableTier, LmdbTierError, MemoryDurableTier};
pub use entry::{age_at, is_expired, CacheEntry, DurableRecord, Version};
pub use key::{CacheKey, Namespace, SEPARATOR};
pub use read::{CacheRead, TierKind};
pub use tiered::TieredCache;
pub use traits::{CacheStats, Cacheable, DurableTier};
