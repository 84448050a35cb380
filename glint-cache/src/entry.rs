//! Cache entries, versions and the durable record format.

use std::time::Duration;

use chrono::{DateTime, Utc};
use glint_core::Timestamp;
use serde::{Deserialize, Serialize};

use super::key::CacheKey;

/// Monotonic version tag of a cached payload.
///
/// When a writer supplies no version, the store time in epoch milliseconds is
/// used, so later writes compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Version derived from a store time. Pre-epoch times clamp to zero.
    pub fn from_timestamp(at: Timestamp) -> Self {
        Self(u64::try_from(at.timestamp_millis()).unwrap_or(0))
    }
}

/// A cached payload together with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub payload: T,
    pub stored_at: Timestamp,
    pub version: Version,
}

impl<T> CacheEntry<T> {
    pub fn new(key: CacheKey, payload: T, stored_at: Timestamp, version: Version) -> Self {
        Self {
            key,
            payload,
            stored_at,
            version,
        }
    }

    /// Age of the entry at `now`.
    pub fn age(&self, now: Timestamp) -> Duration {
        age_at(self.stored_at, now)
    }

    /// An entry is valid only while `now - stored_at < ttl`.
    pub fn is_expired(&self, ttl: Duration, now: Timestamp) -> bool {
        is_expired(self.stored_at, ttl, now)
    }
}

/// Age of something stored at `stored_at`. A store time in the future (clock
/// skew) counts as age zero.
pub fn age_at(stored_at: Timestamp, now: Timestamp) -> Duration {
    now.signed_duration_since(stored_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

pub fn is_expired(stored_at: Timestamp, ttl: Duration, now: Timestamp) -> bool {
    age_at(stored_at, now) >= ttl
}

/// Length of the fixed header of an encoded [`DurableRecord`].
const HEADER_LEN: usize = 20;

/// Encoded form of an entry in the durable tier.
///
/// Format: `[stored_at secs: 8 bytes LE][stored_at nanos: 4 bytes LE][version: 8 bytes LE][JSON payload]`
///
/// The store time round-trips exactly; invalidation tombstones compare
/// against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableRecord {
    pub stored_at: Timestamp,
    pub version: Version,
    pub body: Vec<u8>,
}

impl DurableRecord {
    pub fn new(stored_at: Timestamp, version: Version, body: Vec<u8>) -> Self {
        Self {
            stored_at,
            version,
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.body.len());
        bytes.extend_from_slice(&self.stored_at.timestamp().to_le_bytes());
        bytes.extend_from_slice(&self.stored_at.timestamp_subsec_nanos().to_le_bytes());
        bytes.extend_from_slice(&self.version.get().to_le_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Decode a record. Returns `None` for truncated input or an
    /// unrepresentable timestamp; callers treat that as a corrupt entry.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let secs = i64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let nanos = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let version = u64::from_le_bytes(bytes[12..20].try_into().ok()?);
        let stored_at: DateTime<Utc> = DateTime::from_timestamp(secs, nanos)?;
        Some(Self {
            stored_at,
            version: Version::new(version),
            body: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// Size of the encoded record in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }
}
