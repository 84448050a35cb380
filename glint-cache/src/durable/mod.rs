//! Durable tier implementations.

mod lmdb;
mod memory;

pub use lmdb::{LmdbDurableTier, LmdbTierError};
pub use memory::MemoryDurableTier;
