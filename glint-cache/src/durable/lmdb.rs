//! LMDB-backed durable tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache entries in a
//! memory-mapped file that outlives the process. The map size is the tier's
//! capacity: once it is exhausted LMDB reports `MDB_MAP_FULL`, surfaced as
//! [`CacheError::CapacityExceeded`] so the tiered cache can drop the write.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The tier uses:
//! - Read transactions for `get`, `len` and prefix scans
//! - Write transactions for `put`, `remove` and `remove_prefix`

use std::path::Path;

use async_trait::async_trait;
use glint_core::{CacheError, GlintError, GlintResult};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, MdbError};

use crate::entry::DurableRecord;
use crate::key::CacheKey;
use crate::traits::DurableTier;

/// Error type for LMDB tier operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbTierError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// The map is full.
    #[error("LMDB map full: {0}")]
    MapFull(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbTierError {
    fn from(e: heed::Error) -> Self {
        match e {
            heed::Error::Mdb(MdbError::MapFull) => LmdbTierError::MapFull(e.to_string()),
            other => LmdbTierError::Transaction(other.to_string()),
        }
    }
}

/// Convert LmdbTierError to GlintError.
impl From<LmdbTierError> for GlintError {
    fn from(e: LmdbTierError) -> Self {
        let cache_error = match e {
            LmdbTierError::MapFull(reason) => CacheError::CapacityExceeded { reason },
            LmdbTierError::EnvOpen(reason) | LmdbTierError::DbOpen(reason) => {
                CacheError::EnvOpen { reason }
            }
            LmdbTierError::Io(err) => CacheError::EnvOpen {
                reason: err.to_string(),
            },
            LmdbTierError::Transaction(reason) => CacheError::Durable { reason },
        };
        GlintError::Cache(cache_error)
    }
}

/// LMDB-backed durable tier.
///
/// # Example
///
/// ```ignore
/// use glint_cache::{LmdbDurableTier, TieredCache};
///
/// let durable = LmdbDurableTier::new("/tmp/glint-cache", 64 * 1024 * 1024)?;
/// let cache = TieredCache::new(Arc::new(durable), Duration::from_secs(600));
/// ```
pub struct LmdbDurableTier {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbDurableTier {
    /// Open (or create) a durable tier in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_bytes` - Map size, i.e. the tier's capacity
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_bytes: usize) -> Result<Self, LmdbTierError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this
        // process and never re-opened while alive.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_bytes)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbTierError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbTierError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbTierError> {
        let rtxn = self.env.read_txn()?;

        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn)? {
            match result {
                Ok((key, _)) => {
                    if key.starts_with(prefix) {
                        keys.push(key.to_vec());
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl DurableTier for LmdbDurableTier {
    async fn get(&self, key: &CacheKey) -> GlintResult<Option<DurableRecord>> {
        let rtxn = self.env.read_txn().map_err(LmdbTierError::from)?;

        match self.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => match DurableRecord::decode(bytes) {
                Some(record) => Ok(Some(record)),
                None => Err(CacheError::Deserialization {
                    key: key.to_string(),
                    reason: "truncated durable record".to_string(),
                }
                .into()),
            },
            Ok(None) => Ok(None),
            Err(e) => Err(LmdbTierError::from(e).into()),
        }
    }

    async fn put(&self, key: &CacheKey, record: &DurableRecord) -> GlintResult<()> {
        let bytes = record.encode();

        let mut wtxn = self.env.write_txn().map_err(LmdbTierError::from)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(LmdbTierError::from)?;
        wtxn.commit().map_err(LmdbTierError::from)?;

        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> GlintResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(LmdbTierError::from)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(LmdbTierError::from)?;
        wtxn.commit().map_err(LmdbTierError::from)?;

        Ok(deleted)
    }

    async fn remove_prefix(&self, prefix: &str) -> GlintResult<Vec<CacheKey>> {
        let keys_to_delete = self.collect_keys_with_prefix(prefix.as_bytes())?;

        let mut wtxn = self.env.write_txn().map_err(LmdbTierError::from)?;

        let mut removed = Vec::with_capacity(keys_to_delete.len());
        for key in keys_to_delete {
            if self.db.delete(&mut wtxn, &key).unwrap_or(false) {
                removed.push(CacheKey::raw(String::from_utf8_lossy(&key).into_owned()));
            }
        }

        wtxn.commit().map_err(LmdbTierError::from)?;

        Ok(removed)
    }

    async fn len(&self) -> GlintResult<u64> {
        let rtxn = self.env.read_txn().map_err(LmdbTierError::from)?;
        let len = self.db.len(&rtxn).map_err(LmdbTierError::from)?;
        Ok(len)
    }
}
