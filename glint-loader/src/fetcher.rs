//! Incremental list refresh.
//!
//! A parent's list is fetched in full once; after that only items newer
//! than the newest one already held are requested and merged in front.
//! Every successful refresh rewrites the cached list, so the next view can
//! render it instantly.

use std::collections::HashSet;
use std::sync::Arc;

use glint_cache::{CacheRead, Cacheable, TieredCache};
use glint_core::{newest_of, reindex, GlintResult, Item, LoaderSettings, ParentId};

use crate::namespaces::list_key;
use crate::source::ItemSource;

/// Put `fetched` (newer items) in front of `existing`.
///
/// Duplicates by id keep the fetched copy; existing items keep their
/// relative order. Indices are rewritten to list position. Merging the same
/// batch twice changes nothing.
pub fn merge_newer<M, H>(existing: Vec<Item<M, H>>, fetched: Vec<Item<M, H>>) -> Vec<Item<M, H>> {
    let mut seen = HashSet::with_capacity(existing.len() + fetched.len());
    let mut merged = Vec::with_capacity(existing.len() + fetched.len());

    for item in fetched.into_iter().chain(existing) {
        if seen.insert(item.id) {
            merged.push(item);
        }
    }

    reindex(&mut merged);
    merged
}

/// Append an older page behind `existing`. Duplicates keep the existing copy.
pub fn merge_older<M, H>(existing: Vec<Item<M, H>>, fetched: Vec<Item<M, H>>) -> Vec<Item<M, H>> {
    let mut seen = HashSet::with_capacity(existing.len() + fetched.len());
    let mut merged = Vec::with_capacity(existing.len() + fetched.len());

    for item in existing.into_iter().chain(fetched) {
        if seen.insert(item.id) {
            merged.push(item);
        }
    }

    reindex(&mut merged);
    merged
}

/// Fetches a parent's list, asking only for what is new.
///
/// Refreshes of the same parent must not run concurrently; the fetcher
/// holds no lock across calls.
pub struct IncrementalFetcher<M, H> {
    source: Arc<dyn ItemSource<M, H>>,
    cache: Arc<TieredCache>,
    page_size: usize,
}

impl<M, H> Clone for IncrementalFetcher<M, H> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
            page_size: self.page_size,
        }
    }
}

impl<M: Cacheable, H: Cacheable> IncrementalFetcher<M, H> {
    pub fn new(source: Arc<dyn ItemSource<M, H>>, cache: Arc<TieredCache>, page_size: usize) -> Self {
        Self {
            source,
            cache,
            page_size,
        }
    }

    pub fn from_settings(
        source: Arc<dyn ItemSource<M, H>>,
        cache: Arc<TieredCache>,
        settings: &LoaderSettings,
    ) -> Self {
        Self::new(source, cache, settings.page_size)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// The cached list, if any. This is the instant-display path.
    pub async fn cached(&self, parent: ParentId) -> GlintResult<Option<CacheRead<Vec<Item<M, H>>>>> {
        self.cache.get(&list_key(parent)).await
    }

    /// Bring `existing` up to date.
    ///
    /// With nothing held, the first page is fetched. Otherwise only items
    /// created after the newest held item are fetched and merged in front.
    /// On success the merged list is cached; on failure the error is returned
    /// and the cache is left as it was.
    pub async fn refresh(
        &self,
        parent: ParentId,
        existing: &[Item<M, H>],
    ) -> GlintResult<Vec<Item<M, H>>> {
        let merged = match newest_of(existing) {
            None => {
                let page = self
                    .source
                    .fetch_page(parent, self.page_size, 0)
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(parent = %parent, error = %e, "Initial list fetch failed");
                    })?;
                tracing::debug!(parent = %parent, fetched = page.len(), "Fetched first page");
                merge_newer(Vec::new(), page)
            }
            Some(newest) => {
                let cursor = newest.created_at;
                let fetched = self
                    .source
                    .fetch_since(parent, cursor)
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(parent = %parent, error = %e, "Incremental fetch failed");
                    })?;
                tracing::debug!(
                    parent = %parent,
                    cursor = %cursor,
                    fetched = fetched.len(),
                    "Fetched items since cursor"
                );
                merge_newer(existing.to_vec(), fetched)
            }
        };

        self.cache.set(&list_key(parent), merged.clone(), None).await?;
        Ok(merged)
    }

    /// Cached list (or nothing), brought up to date.
    pub async fn load(&self, parent: ParentId) -> GlintResult<Vec<Item<M, H>>> {
        let existing = self
            .cached(parent)
            .await?
            .map(CacheRead::into_value)
            .unwrap_or_default();
        self.refresh(parent, &existing).await
    }

    /// Fetch the page after `existing` and append it.
    pub async fn load_older(
        &self,
        parent: ParentId,
        existing: &[Item<M, H>],
    ) -> GlintResult<Vec<Item<M, H>>> {
        let offset = existing.len();
        let page = self
            .source
            .fetch_page(parent, self.page_size, offset)
            .await
            .inspect_err(|e| {
                tracing::warn!(parent = %parent, offset, error = %e, "Older page fetch failed");
            })?;
        tracing::debug!(parent = %parent, offset, fetched = page.len(), "Fetched older page");

        let merged = merge_older(existing.to_vec(), page);
        self.cache.set(&list_key(parent), merged.clone(), None).await?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use glint_core::ItemId;

    fn items(ids: &[i64]) -> Vec<Item<String, ()>> {
        let base = Utc::now();
        ids.iter()
            .enumerate()
            .map(|(position, id)| {
                Item::new(*id, position, format!("item {id}"), base + Duration::minutes(*id))
            })
            .collect()
    }

    fn ids(list: &[Item<String, ()>]) -> Vec<i64> {
        list.iter().map(|item| item.id.get()).collect()
    }

    #[test]
    fn test_merge_newer_prepends_and_reindexes() {
        let merged = merge_newer(items(&[5, 4, 3]), items(&[7, 6]));
        assert_eq!(ids(&merged), vec![7, 6, 5, 4, 3]);
        for (position, item) in merged.iter().enumerate() {
            assert_eq!(item.index, position);
        }
    }

    #[test]
    fn test_merge_newer_prefers_fetched_copy() {
        let mut fetched = items(&[6, 5]);
        fetched[1].metadata = "edited".to_string();

        let merged = merge_newer(items(&[5, 4]), fetched);
        assert_eq!(ids(&merged), vec![6, 5, 4]);
        assert_eq!(merged[1].metadata, "edited");
    }

    #[test]
    fn test_merge_newer_with_nothing_new_keeps_list() {
        let existing = items(&[3, 2, 1]);
        let merged = merge_newer(existing.clone(), Vec::new());
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_merge_newer_is_idempotent() {
        let once = merge_newer(items(&[5, 4, 3]), items(&[7, 6, 5]));
        let twice = merge_newer(once.clone(), items(&[7, 6, 5]));
        assert_eq!(ids(&once), ids(&twice));
        assert_eq!(once.len(), 5);
    }

    #[test]
    fn test_merge_older_keeps_existing_copy() {
        let mut fetched = items(&[3, 2]);
        fetched[0].metadata = "stale".to_string();

        let merged = merge_older(items(&[5, 4, 3]), fetched);
        assert_eq!(ids(&merged), vec![5, 4, 3, 2]);
        assert_eq!(merged[2].id, ItemId::new(3));
        assert_eq!(merged[2].metadata, "item 3");
        assert_eq!(merged[3].index, 3);
    }
}
