//! Collaborators the engine talks to.
//!
//! Implementations wrap the consumer's transport (REST client, RPC stub).
//! Failures should be reported as [`TransportError`](glint_core::TransportError)
//! so they surface as retryable.

use async_trait::async_trait;
use glint_cache::Cacheable;
use glint_core::{GlintResult, Item, ItemId, ParentId, Timestamp};

use crate::action::ActionOptions;

/// Source of item metadata. Lists are returned newest-first.
#[async_trait]
pub trait ItemSource<M, H>: Send + Sync {
    /// One page of the parent's items.
    async fn fetch_page(
        &self,
        parent: ParentId,
        limit: usize,
        offset: usize,
    ) -> GlintResult<Vec<Item<M, H>>>;

    /// Items created strictly after `cursor`.
    async fn fetch_since(&self, parent: ParentId, cursor: Timestamp)
        -> GlintResult<Vec<Item<M, H>>>;
}

/// Source of the heavy per-item data.
#[async_trait]
pub trait PayloadSource<H>: Send + Sync {
    /// Payload of `item`, currently at position `index` of the list.
    async fn fetch_payload(&self, parent: ParentId, item: ItemId, index: usize) -> GlintResult<H>;
}

/// The expensive downstream operation that needs the complete data set.
#[async_trait]
pub trait DependentAction: Send + Sync {
    type Output: Cacheable;

    async fn trigger(&self, parent: ParentId, options: &ActionOptions)
        -> GlintResult<Self::Output>;
}
