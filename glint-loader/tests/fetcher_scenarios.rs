//! Incremental refresh scenarios against a scripted item source.

use std::sync::Arc;
use std::time::Duration;

use glint_cache::{MemoryDurableTier, TierKind, TieredCache};
use glint_loader::{list_key, IncrementalFetcher};
use glint_test_utils::assertions::{assert_ids, assert_indexed_by_position, assert_retryable};
use glint_test_utils::fixtures::{cache, captures, item, parent, timeline};
use glint_test_utils::{CaptureMeta, ScriptedItemSource, Screenshot, TestItem};

fn fetcher(
    source: &Arc<ScriptedItemSource>,
    cache: &Arc<TieredCache>,
    page_size: usize,
) -> IncrementalFetcher<CaptureMeta, Screenshot> {
    IncrementalFetcher::new(source.clone(), Arc::clone(cache), page_size)
}

#[tokio::test]
async fn merges_only_newer_items_in_front_of_cached_list() {
    let parent = parent();
    let cache = cache();
    let source = Arc::new(ScriptedItemSource::new(timeline(&[5, 4, 3])));
    let fetcher = fetcher(&source, &cache, 50);

    let first = fetcher.load(parent).await.expect("initial load");
    assert_ids(&first, &[5, 4, 3]);

    source.publish_newer(timeline(&[7, 6]));
    let refreshed = fetcher.refresh(parent, &first).await.expect("refresh");

    assert_ids(&refreshed, &[7, 6, 5, 4, 3]);
    assert_indexed_by_position(&refreshed);
    assert_eq!(source.cursors(), vec![item(5).created_at]);

    let cached = fetcher
        .cached(parent)
        .await
        .expect("cache read")
        .expect("list cached");
    assert_ids(cached.value(), &[7, 6, 5, 4, 3]);
}

#[tokio::test]
async fn empty_list_triggers_one_full_page_fetch() {
    let parent = parent();
    let cache = cache();
    let source = Arc::new(ScriptedItemSource::new(captures(80)));
    let fetcher = fetcher(&source, &cache, 50);

    let list = fetcher.refresh(parent, &[]).await.expect("refresh");

    assert_eq!(list.len(), 50);
    assert_eq!(list[0].id.get(), 79);
    assert_eq!(source.page_calls(), 1);
    assert_eq!(source.since_calls(), 0);
}

#[tokio::test]
async fn nothing_new_is_success_and_keeps_list() {
    let parent = parent();
    let cache = cache();
    let source = Arc::new(ScriptedItemSource::new(timeline(&[3, 2, 1])));
    let fetcher = fetcher(&source, &cache, 50);

    let existing = timeline(&[3, 2, 1]);
    let refreshed = fetcher.refresh(parent, &existing).await.expect("refresh");

    assert_eq!(refreshed, existing);
    assert_eq!(source.since_calls(), 1);
    assert!(cache
        .get::<Vec<TestItem>>(&list_key(parent))
        .await
        .expect("cache read")
        .is_some());
}

#[tokio::test]
async fn transport_failure_is_retryable_and_leaves_cache_untouched() {
    let parent = parent();
    let cache = cache();
    let source = Arc::new(ScriptedItemSource::new(timeline(&[5, 4, 3])));
    let fetcher = fetcher(&source, &cache, 50);

    let original = fetcher.load(parent).await.expect("initial load");
    let before = fetcher
        .cached(parent)
        .await
        .expect("cache read")
        .expect("list cached");

    source.publish_newer(timeline(&[6]));
    source.set_failing(true);
    let result = fetcher.refresh(parent, &original).await;
    assert_retryable(&result);

    let after = fetcher
        .cached(parent)
        .await
        .expect("cache read")
        .expect("list still cached");
    assert_ids(after.value(), &[5, 4, 3]);
    assert_eq!(after.stored_at(), before.stored_at());
}

#[tokio::test]
async fn load_starts_from_cached_list() {
    let parent = parent();
    let cache = cache();
    cache
        .set(&list_key(parent), timeline(&[5, 4, 3]), None)
        .await
        .expect("seed cache");

    let source = Arc::new(ScriptedItemSource::new(timeline(&[7, 6, 5, 4, 3])));
    let fetcher = fetcher(&source, &cache, 50);

    let list = fetcher.load(parent).await.expect("load");
    assert_ids(&list, &[7, 6, 5, 4, 3]);
    assert_eq!(source.page_calls(), 0);
    assert_eq!(source.since_calls(), 1);
}

#[tokio::test]
async fn load_older_appends_next_page() {
    let parent = parent();
    let cache = cache();
    let source = Arc::new(ScriptedItemSource::new(timeline(&[9, 8, 7, 6, 5])));
    let fetcher = fetcher(&source, &cache, 2);

    let first = fetcher.refresh(parent, &[]).await.expect("first page");
    assert_ids(&first, &[9, 8]);

    let more = fetcher.load_older(parent, &first).await.expect("older page");
    assert_ids(&more, &[9, 8, 7, 6]);
    assert_indexed_by_position(&more);

    let cached = fetcher
        .cached(parent)
        .await
        .expect("cache read")
        .expect("list cached");
    assert_ids(cached.value(), &[9, 8, 7, 6]);
}

#[tokio::test]
async fn cached_list_survives_restart_through_durable_tier() {
    let parent = parent();
    let durable = Arc::new(MemoryDurableTier::unbounded());
    let source = Arc::new(ScriptedItemSource::new(timeline(&[2, 1])));

    let before_restart = Arc::new(TieredCache::new(durable.clone(), Duration::from_secs(600)));
    fetcher(&source, &before_restart, 50)
        .load(parent)
        .await
        .expect("load");

    let after_restart = Arc::new(TieredCache::new(durable, Duration::from_secs(600)));
    let read = fetcher(&source, &after_restart, 50)
        .cached(parent)
        .await
        .expect("cache read")
        .expect("durable tier serves the list");

    assert_eq!(read.tier(), TierKind::Durable);
    assert_ids(read.value(), &[2, 1]);
}
