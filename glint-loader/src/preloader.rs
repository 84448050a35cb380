//! Sequential background preloader.
//!
//! Loads the heavy payload of each item one at a time, in ascending index
//! order, so the first items of a list become viewable first and the
//! transport is never flooded. A viewer can ask for any item out of order
//! ("jump ahead"); the sequential pass then skips it.
//!
//! # Cancellation
//!
//! `abort` is cooperative. The sequential pass stops before its next item;
//! a request already in flight is allowed to finish, and its payload may
//! land in the cache, but it is not recorded and emits nothing. The abort
//! flag is checked under the same lock that records results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glint_cache::{Cacheable, TieredCache};
use glint_core::{GlintResult, Item, LoaderError, LoaderSettings, ParentId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::PreloadEvent;
use crate::gate::LoadGate;
use crate::namespaces::capture_key;
use crate::source::PayloadSource;
use crate::state::{Admission, ItemStatus, JumpOutcome, LoadPath, LoadSnapshot, LoadState, RunPhase};

/// What happened to a finished load.
enum Recorded {
    Loaded,
    Failed,
    Discarded,
}

struct PreloaderInner<M, H> {
    parent: ParentId,
    payloads: Arc<dyn PayloadSource<H>>,
    cache: Arc<TieredCache>,
    state: Mutex<LoadState<M, H>>,
    gate: LoadGate,
    cancel: CancellationToken,
    events: broadcast::Sender<PreloadEvent>,
    started: AtomicBool,
}

/// Preloads payloads for one parent's list. Cheap to clone; clones share
/// the run.
pub struct SequentialPreloader<M, H> {
    inner: Arc<PreloaderInner<M, H>>,
}

impl<M, H> Clone for SequentialPreloader<M, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Cacheable, H: Cacheable> SequentialPreloader<M, H> {
    pub fn new(
        parent: ParentId,
        items: Vec<Item<M, H>>,
        payloads: Arc<dyn PayloadSource<H>>,
        cache: Arc<TieredCache>,
    ) -> Self {
        Self::with_event_capacity(
            parent,
            items,
            payloads,
            cache,
            LoaderSettings::default().event_capacity,
        )
    }

    pub fn with_event_capacity(
        parent: ParentId,
        items: Vec<Item<M, H>>,
        payloads: Arc<dyn PayloadSource<H>>,
        cache: Arc<TieredCache>,
        event_capacity: usize,
    ) -> Self {
        let state = LoadState::new(items);
        let gate = LoadGate::starting_at(parent, state.total(), state.loaded_count());
        let (events, _rx) = broadcast::channel(event_capacity.max(1));

        Self {
            inner: Arc::new(PreloaderInner {
                parent,
                payloads,
                cache,
                state: Mutex::new(state),
                gate,
                cancel: CancellationToken::new(),
                events,
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn parent(&self) -> ParentId {
        self.inner.parent
    }

    pub fn gate(&self) -> &LoadGate {
        &self.inner.gate
    }

    /// Token cancelled by [`abort`](Self::abort).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PreloadEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        self.state().snapshot(self.inner.parent)
    }

    pub fn status(&self, index: usize) -> Option<ItemStatus> {
        self.state().status(index)
    }

    pub fn payload(&self, index: usize) -> Option<H> {
        self.state().payload(index).cloned()
    }

    /// Items with whatever payloads have loaded so far.
    pub fn items(&self) -> Vec<Item<M, H>> {
        self.state().items().to_vec()
    }

    pub fn is_aborted(&self) -> bool {
        self.state().is_aborted()
    }

    /// Run the sequential pass to the end. Returns the final phase.
    ///
    /// A second call does no work and reports the current phase.
    pub async fn run(&self) -> GlintResult<RunPhase> {
        let parent = self.inner.parent;

        if self.inner.started.swap(true, Ordering::AcqRel) {
            tracing::debug!(parent = %parent, "Preload run already started");
            return Ok(self.state().phase());
        }

        let (total, completion) = {
            let mut state = self.state();
            if state.is_aborted() {
                return Ok(RunPhase::Aborted);
            }
            state.mark_started();
            // Covers empty lists and lists whose payloads all came preloaded.
            let completion = self.inner.gate.advance(state.loaded_count());
            (state.total(), completion)
        };

        tracing::info!(parent = %parent, total, "Preload run started");
        self.emit(PreloadEvent::Started { parent, total });
        if let Some(completion) = completion {
            completion.fire();
        }

        for index in 0..total {
            if self.inner.cancel.is_cancelled() {
                break;
            }

            let admission = { self.state().admit(index, LoadPath::Sequential) };
            match admission {
                Admission::Go => {}
                Admission::AlreadyLoaded | Admission::AlreadyInFlight => {
                    tracing::debug!(parent = %parent, index, ?admission, "Skipping item");
                    continue;
                }
                Admission::Aborted => break,
            }

            self.emit(PreloadEvent::ItemLoading {
                parent,
                index,
                jump_ahead: false,
            });
            let result = self.load_one(index).await;
            self.record(index, LoadPath::Sequential, result);
        }

        let (phase, snapshot) = {
            let mut state = self.state();
            let phase = state.finish_run();
            (phase, state.snapshot(parent))
        };

        match phase {
            RunPhase::Complete => {
                tracing::info!(
                    parent = %parent,
                    loaded = snapshot.loaded,
                    total = snapshot.total,
                    failed = snapshot.failed.len(),
                    "Preload run complete"
                );
                self.emit(PreloadEvent::Completed {
                    parent,
                    loaded: snapshot.loaded,
                    total: snapshot.total,
                    failed: snapshot.failed,
                });
            }
            _ => {
                tracing::info!(
                    parent = %parent,
                    loaded = snapshot.loaded,
                    total = snapshot.total,
                    "Preload run stopped after abort"
                );
            }
        }

        Ok(phase)
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn start(&self) -> JoinHandle<GlintResult<RunPhase>> {
        let preloader = self.clone();
        tokio::spawn(async move { preloader.run().await })
    }

    /// Load one item now, out of order.
    pub async fn request_index(&self, index: usize) -> GlintResult<JumpOutcome> {
        let parent = self.inner.parent;

        let admission = {
            let mut state = self.state();
            let total = state.total();
            if index >= total {
                return Err(LoaderError::IndexOutOfRange { index, total }.into());
            }
            state.admit(index, LoadPath::JumpAhead)
        };

        match admission {
            Admission::Go => {}
            Admission::AlreadyLoaded => return Ok(JumpOutcome::AlreadyLoaded),
            Admission::AlreadyInFlight => return Ok(JumpOutcome::AlreadyInFlight),
            Admission::Aborted => return Ok(JumpOutcome::Aborted),
        }

        tracing::debug!(parent = %parent, index, "Jump-ahead load");
        self.emit(PreloadEvent::ItemLoading {
            parent,
            index,
            jump_ahead: true,
        });
        let result = self.load_one(index).await;

        let outcome = match self.record(index, LoadPath::JumpAhead, result) {
            Recorded::Loaded => JumpOutcome::Loaded,
            Recorded::Failed => JumpOutcome::Failed,
            Recorded::Discarded => JumpOutcome::Aborted,
        };
        Ok(outcome)
    }

    /// Re-attempt every failed item. Returns how many loaded this time.
    pub async fn retry_failed(&self) -> GlintResult<usize> {
        let failed: Vec<usize> = { self.state().failed().iter().copied().collect() };

        let mut recovered = 0;
        for index in failed {
            if self.request_index(index).await? == JumpOutcome::Loaded {
                recovered += 1;
            }
        }
        tracing::debug!(parent = %self.inner.parent, recovered, "Retried failed items");
        Ok(recovered)
    }

    /// Stop the run. Idempotent; has no effect once every item is loaded.
    pub fn abort(&self) {
        let aborted = {
            let mut state = self.state();
            let aborted = state.abort();
            if aborted {
                self.inner.gate.abort();
            }
            aborted.then(|| state.snapshot(self.inner.parent))
        };
        self.inner.cancel.cancel();

        if let Some(snapshot) = aborted {
            tracing::info!(
                parent = %self.inner.parent,
                loaded = snapshot.loaded,
                total = snapshot.total,
                "Preload aborted"
            );
            self.emit(PreloadEvent::Aborted {
                parent: self.inner.parent,
                loaded: snapshot.loaded,
                total: snapshot.total,
            });
        }
    }

    /// Cached payload, or a fresh fetch that is then cached.
    async fn load_one(&self, index: usize) -> GlintResult<H> {
        let parent = self.inner.parent;
        let item = {
            let state = self.state();
            state.item_id(index).ok_or(LoaderError::IndexOutOfRange {
                index,
                total: state.total(),
            })?
        };
        let key = capture_key(parent, item);

        match self.inner.cache.get::<H>(&key).await {
            Ok(Some(read)) => {
                tracing::debug!(parent = %parent, index, item = %item, tier = ?read.tier(), "Payload served from cache");
                return Ok(read.into_value());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(parent = %parent, index, error = %e, "Payload cache read failed");
            }
        }

        let payload = self.inner.payloads.fetch_payload(parent, item, index).await?;

        if let Err(e) = self.inner.cache.set(&key, payload.clone(), None).await {
            tracing::warn!(parent = %parent, index, error = %e, "Payload cache write failed");
        }
        Ok(payload)
    }

    fn record(&self, index: usize, path: LoadPath, result: GlintResult<H>) -> Recorded {
        let parent = self.inner.parent;

        match result {
            Ok(payload) => {
                let (recorded, loaded, total, completion) = {
                    let mut state = self.state();
                    let recorded = state.record_loaded(index, payload, path);
                    let completion = if recorded {
                        self.inner.gate.advance(state.loaded_count())
                    } else {
                        None
                    };
                    (recorded, state.loaded_count(), state.total(), completion)
                };

                if !recorded {
                    tracing::debug!(parent = %parent, index, "Discarding payload loaded after abort");
                    return Recorded::Discarded;
                }

                self.emit(PreloadEvent::ItemLoaded {
                    parent,
                    index,
                    loaded,
                    total,
                });
                if let Some(completion) = completion {
                    tracing::info!(parent = %parent, total, "All items loaded");
                    completion.fire();
                }
                Recorded::Loaded
            }
            Err(e) => {
                let recorded = { self.state().record_failed(index, path) };
                if !recorded {
                    tracing::debug!(parent = %parent, index, error = %e, "Ignoring failure after abort");
                    return Recorded::Discarded;
                }

                tracing::warn!(parent = %parent, index, error = %e, "Payload load failed");
                self.emit(PreloadEvent::ItemFailed {
                    parent,
                    index,
                    reason: e.to_string(),
                });
                Recorded::Failed
            }
        }
    }

    fn emit(&self, event: PreloadEvent) {
        let event_type = event.event_type();
        if self.inner.events.send(event).is_err() {
            tracing::trace!(event_type, "No subscribers for preload event");
        }
    }

    /// Every critical section leaves the state consistent, so a poisoned
    /// guard is still usable.
    fn state(&self) -> MutexGuard<'_, LoadState<M, H>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use glint_core::{ItemId, TransportError};
    use std::collections::HashSet;
    use std::time::Duration;

    /// Payload `index * 10`; fails for listed indices; logs fetch order.
    struct Numbers {
        failing: HashSet<usize>,
        calls: Mutex<Vec<usize>>,
    }

    impl Numbers {
        fn new(failing: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl PayloadSource<u32> for Numbers {
        async fn fetch_payload(
            &self,
            parent: ParentId,
            _item: ItemId,
            index: usize,
        ) -> GlintResult<u32> {
            self.calls.lock().expect("calls lock").push(index);
            if self.failing.contains(&index) {
                return Err(TransportError::PayloadFetch {
                    parent,
                    index,
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(index as u32 * 10)
        }
    }

    fn preloader(n: usize, source: Arc<Numbers>) -> SequentialPreloader<(), u32> {
        let items = (0..n)
            .map(|i| Item::new(i as i64, i, (), Utc::now()))
            .collect();
        SequentialPreloader::new(
            ParentId::now_v7(),
            items,
            source,
            Arc::new(TieredCache::in_memory(Duration::from_secs(600))),
        )
    }

    #[tokio::test]
    async fn test_run_loads_in_order() {
        let source = Numbers::new(&[]);
        let preloader = preloader(4, Arc::clone(&source));

        let phase = preloader.run().await.expect("run");
        assert_eq!(phase, RunPhase::Complete);
        assert_eq!(source.calls(), vec![0, 1, 2, 3]);
        assert_eq!(preloader.payload(3), Some(30));
        assert!(preloader.gate().is_complete());
    }

    #[tokio::test]
    async fn test_jump_ahead_before_run_is_not_refetched() {
        let source = Numbers::new(&[]);
        let preloader = preloader(3, Arc::clone(&source));

        assert_eq!(
            preloader.request_index(2).await.expect("jump"),
            JumpOutcome::Loaded
        );
        assert_eq!(
            preloader.request_index(2).await.expect("jump"),
            JumpOutcome::AlreadyLoaded
        );
        preloader.run().await.expect("run");
        assert_eq!(source.calls(), vec![2, 0, 1]);
    }

    #[tokio::test]
    async fn test_out_of_range_jump_is_an_error() {
        let preloader = preloader(2, Numbers::new(&[]));
        let err = preloader.request_index(2).await.unwrap_err();
        assert!(matches!(
            err,
            glint_core::GlintError::Loader(LoaderError::IndexOutOfRange { index: 2, total: 2 })
        ));
    }

    #[tokio::test]
    async fn test_second_run_does_nothing() {
        let source = Numbers::new(&[]);
        let preloader = preloader(2, Arc::clone(&source));
        preloader.run().await.expect("run");
        assert_eq!(preloader.run().await.expect("run"), RunPhase::Complete);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_before_run() {
        let source = Numbers::new(&[]);
        let preloader = preloader(2, Arc::clone(&source));
        preloader.abort();

        assert_eq!(preloader.run().await.expect("run"), RunPhase::Aborted);
        assert_eq!(
            preloader.request_index(0).await.expect("jump"),
            JumpOutcome::Aborted
        );
        assert!(source.calls().is_empty());
        assert!(preloader.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_retry_failed_recovers() {
        let source = Numbers::new(&[1]);
        let preloader = preloader(2, Arc::clone(&source));
        preloader.run().await.expect("run");
        assert_eq!(preloader.status(1), Some(ItemStatus::Failed));

        // Still failing: nothing recovered, still marked failed.
        assert_eq!(preloader.retry_failed().await.expect("retry"), 0);
        assert_eq!(preloader.snapshot().failed, vec![1]);
    }

    #[tokio::test]
    async fn test_preloaded_list_completes_gate_at_run_start() {
        let source = Numbers::new(&[]);
        let items = (0..2)
            .map(|i| Item::new(i as i64, i, (), Utc::now()).with_payload(i as u32))
            .collect();
        let preloader = SequentialPreloader::new(
            ParentId::now_v7(),
            items,
            source.clone(),
            Arc::new(TieredCache::in_memory(Duration::from_secs(600))),
        );
        assert_eq!(preloader.gate().loaded(), 2);
        assert!(!preloader.gate().is_complete());

        assert_eq!(preloader.run().await.expect("run"), RunPhase::Complete);
        assert!(preloader.gate().is_complete());
        assert!(source.calls().is_empty());
    }
}
