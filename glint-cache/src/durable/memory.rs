//! In-process durable tier.
//!
//! Stands in for LMDB when no directory is configured and in tests. It keeps
//! the same contract, including the byte capacity: a `put` that would push
//! the stored bytes past the limit fails with `CapacityExceeded`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use glint_core::{CacheError, GlintResult};

use crate::entry::DurableRecord;
use crate::key::CacheKey;
use crate::traits::DurableTier;

#[derive(Debug, Default)]
struct Stored {
    records: BTreeMap<String, Vec<u8>>,
    bytes: usize,
}

/// Byte-bounded, memory-resident durable tier.
#[derive(Debug)]
pub struct MemoryDurableTier {
    stored: Mutex<Stored>,
    capacity_bytes: usize,
}

impl MemoryDurableTier {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            stored: Mutex::new(Stored::default()),
            capacity_bytes,
        }
    }

    /// A tier that never reports capacity errors.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Bytes currently held, keys included.
    pub fn used_bytes(&self) -> GlintResult<usize> {
        let stored = self.stored.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(stored.bytes)
    }
}

impl Default for MemoryDurableTier {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl DurableTier for MemoryDurableTier {
    async fn get(&self, key: &CacheKey) -> GlintResult<Option<DurableRecord>> {
        let stored = self.stored.lock().map_err(|_| CacheError::LockPoisoned)?;
        match stored.records.get(key.as_str()) {
            Some(bytes) => match DurableRecord::decode(bytes) {
                Some(record) => Ok(Some(record)),
                None => Err(CacheError::Deserialization {
                    key: key.to_string(),
                    reason: "truncated durable record".to_string(),
                }
                .into()),
            },
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, record: &DurableRecord) -> GlintResult<()> {
        let bytes = record.encode();
        let mut stored = self.stored.lock().map_err(|_| CacheError::LockPoisoned)?;

        let replaced = stored
            .records
            .get(key.as_str())
            .map(|old| key.as_str().len() + old.len())
            .unwrap_or(0);
        let needed = key.as_str().len() + bytes.len();
        let projected = stored.bytes.saturating_sub(replaced).saturating_add(needed);
        if projected > self.capacity_bytes {
            return Err(CacheError::CapacityExceeded {
                reason: format!(
                    "{needed} bytes for '{key}' would exceed {} byte limit ({} in use)",
                    self.capacity_bytes, stored.bytes
                ),
            }
            .into());
        }

        stored.records.insert(key.as_str().to_string(), bytes);
        stored.bytes = projected;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> GlintResult<bool> {
        let mut stored = self.stored.lock().map_err(|_| CacheError::LockPoisoned)?;
        match stored.records.remove(key.as_str()) {
            Some(old) => {
                stored.bytes = stored.bytes.saturating_sub(key.as_str().len() + old.len());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> GlintResult<Vec<CacheKey>> {
        let mut stored = self.stored.lock().map_err(|_| CacheError::LockPoisoned)?;

        // BTreeMap keeps keys sorted, so the prefixed run is contiguous.
        let keys: Vec<String> = stored
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(old) = stored.records.remove(&key) {
                stored.bytes = stored.bytes.saturating_sub(key.len() + old.len());
                removed.push(CacheKey::raw(key));
            }
        }
        Ok(removed)
    }

    async fn len(&self) -> GlintResult<u64> {
        let stored = self.stored.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(stored.records.len() as u64)
    }
}
