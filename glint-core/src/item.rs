//! The generic unit being listed and progressively loaded.

use crate::{ItemId, Timestamp};
use serde::{Deserialize, Serialize};

/// Heavy per-item data, which starts out unloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload<H> {
    Unloaded,
    Loaded(H),
}

impl<H> Default for Payload<H> {
    fn default() -> Self {
        Payload::Unloaded
    }
}

impl<H> Payload<H> {
    // Named default for serde, which would otherwise demand `H: Default`.
    fn unloaded() -> Self {
        Payload::Unloaded
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Payload::Loaded(_))
    }

    pub fn as_loaded(&self) -> Option<&H> {
        match self {
            Payload::Loaded(payload) => Some(payload),
            Payload::Unloaded => None,
        }
    }

    pub fn into_loaded(self) -> Option<H> {
        match self {
            Payload::Loaded(payload) => Some(payload),
            Payload::Unloaded => None,
        }
    }
}

/// One entry of an ordered list: a "session" of a user, or a "capture" of a
/// session.
///
/// `index` is the position in the list. Lists are ordered newest-first, so a
/// lower index means a more recent item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item<M, H> {
    pub id: ItemId,
    pub index: usize,
    pub metadata: M,
    #[serde(default = "Payload::unloaded")]
    pub payload: Payload<H>,
    pub created_at: Timestamp,
}

impl<M, H> Item<M, H> {
    /// Create an item with an unloaded payload.
    pub fn new(id: i64, index: usize, metadata: M, created_at: Timestamp) -> Self {
        Self {
            id: ItemId::new(id),
            index,
            metadata,
            payload: Payload::Unloaded,
            created_at,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.payload.is_loaded()
    }

    /// Attach a loaded payload.
    pub fn with_payload(mut self, payload: H) -> Self {
        self.payload = Payload::Loaded(payload);
        self
    }
}

/// Newest item of a newest-first list, by creation time.
///
/// Ties and out-of-order lists are tolerated: the maximum `created_at` wins.
pub fn newest_of<M, H>(items: &[Item<M, H>]) -> Option<&Item<M, H>> {
    items.iter().max_by_key(|item| item.created_at)
}

/// Rewrite every item's `index` to match its position.
pub fn reindex<M, H>(items: &mut [Item<M, H>]) {
    for (position, item) in items.iter_mut().enumerate() {
        item.index = position;
    }
}
