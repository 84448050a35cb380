//! Opening and closing a view.

use std::sync::Arc;

use glint_core::LoaderSettings;
use glint_loader::{list_key, IncrementalFetcher, PreloadEvent, RunPhase, ViewerSession};
use glint_test_utils::assertions::{assert_ids, assert_retryable};
use glint_test_utils::fixtures::{cache, parent, timeline};
use glint_test_utils::{
    CaptureMeta, ItemId, Payload, ScriptedItemSource, ScriptedPayloadSource, Screenshot,
};

type Session = ViewerSession<CaptureMeta, Screenshot>;

#[tokio::test]
async fn open_refreshes_and_preloads_everything() {
    let parent = parent();
    let cache = cache();
    let items = Arc::new(ScriptedItemSource::new(timeline(&[3, 2, 1])));
    let payloads = Arc::new(ScriptedPayloadSource::new());
    let fetcher = IncrementalFetcher::new(items.clone(), Arc::clone(&cache), 50);

    let mut session: Session = ViewerSession::open(
        parent,
        &fetcher,
        payloads.clone(),
        Arc::clone(&cache),
        &LoaderSettings::default(),
    )
    .await
    .expect("open");

    assert!(!session.served_from_cache());
    assert_eq!(session.finished().await, Some(RunPhase::Complete));
    assert_eq!(session.finished().await, None);

    assert!(session.gate().is_complete());
    assert_eq!(payloads.calls(), vec![0, 1, 2]);
    assert_ids(&session.items(), &[3, 2, 1]);
    assert!(session.items().iter().all(|item| item.is_loaded()));
}

#[tokio::test]
async fn failed_refresh_falls_back_to_cached_list() {
    let parent = parent();
    let cache = cache();
    cache
        .set(&list_key(parent), timeline(&[5, 4]), None)
        .await
        .expect("seed cache");

    let items = Arc::new(ScriptedItemSource::new(timeline(&[6, 5, 4])));
    items.set_failing(true);
    let fetcher = IncrementalFetcher::new(items.clone(), Arc::clone(&cache), 50);

    let mut session: Session = ViewerSession::open(
        parent,
        &fetcher,
        Arc::new(ScriptedPayloadSource::new()),
        Arc::clone(&cache),
        &LoaderSettings::default(),
    )
    .await
    .expect("open from cache");

    assert!(session.served_from_cache());
    assert_ids(&session.items(), &[5, 4]);
    assert_eq!(session.finished().await, Some(RunPhase::Complete));
    assert_eq!(session.snapshot().total, 2);
}

#[tokio::test]
async fn failed_refresh_with_nothing_cached_is_an_error() {
    let parent = parent();
    let cache = cache();
    let items = Arc::new(ScriptedItemSource::new(timeline(&[1])));
    items.set_failing(true);
    let fetcher = IncrementalFetcher::new(items.clone(), Arc::clone(&cache), 50);

    let result: Result<Session, _> = ViewerSession::open(
        parent,
        &fetcher,
        Arc::new(ScriptedPayloadSource::new()),
        Arc::clone(&cache),
        &LoaderSettings::default(),
    )
    .await;

    assert_retryable(&result.map(|session| session.parent()));
}

#[tokio::test]
async fn closing_the_view_aborts_the_run() {
    let parent = parent();
    let cache = cache();
    let items = Arc::new(ScriptedItemSource::new(timeline(&[4, 3, 2, 1])));
    let payloads = Arc::new(ScriptedPayloadSource::new());
    payloads.hold(1);
    let fetcher = IncrementalFetcher::new(items.clone(), Arc::clone(&cache), 50);

    let session: Session = ViewerSession::open(
        parent,
        &fetcher,
        payloads.clone(),
        Arc::clone(&cache),
        &LoaderSettings::default(),
    )
    .await
    .expect("open");
    let preloader = session.preloader().clone();
    let mut events = session.subscribe();

    payloads.wait_entered(1).await;
    drop(session);
    payloads.release(1);

    assert!(preloader.is_aborted());
    assert!(preloader.gate().is_aborted());

    let mut saw_abort = false;
    while let Ok(event) = events.recv().await {
        if let PreloadEvent::Aborted { loaded, total, .. } = event {
            assert_eq!((loaded, total), (1, 4));
            saw_abort = true;
            break;
        }
    }
    assert!(saw_abort);
    assert_eq!(payloads.fetch_count(2), 0);
}

#[tokio::test]
async fn reopening_after_newer_items_keeps_payloads_on_their_items() {
    let parent = parent();
    let cache = cache();
    let items = Arc::new(ScriptedItemSource::new(timeline(&[3, 2, 1])));
    let fetcher = IncrementalFetcher::new(items.clone(), Arc::clone(&cache), 50);

    let mut first: Session = ViewerSession::open(
        parent,
        &fetcher,
        Arc::new(ScriptedPayloadSource::new()),
        Arc::clone(&cache),
        &LoaderSettings::default(),
    )
    .await
    .expect("first open");
    assert_eq!(first.finished().await, Some(RunPhase::Complete));
    first.close();

    items.publish_newer(timeline(&[5, 4]));
    let payloads = Arc::new(ScriptedPayloadSource::new());
    let mut second: Session = ViewerSession::open(
        parent,
        &fetcher,
        payloads.clone(),
        Arc::clone(&cache),
        &LoaderSettings::default(),
    )
    .await
    .expect("second open");
    assert_eq!(second.finished().await, Some(RunPhase::Complete));

    assert_ids(&second.items(), &[5, 4, 3, 2, 1]);
    for item in second.items() {
        assert_eq!(item.payload, Payload::Loaded(Screenshot::of(item.id)));
    }
    assert_eq!(payloads.fetched_items(), vec![ItemId::new(5), ItemId::new(4)]);
    assert!(second.gate().is_complete());
}
