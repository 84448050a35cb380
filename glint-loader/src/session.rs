//! Lifecycle of one open view.
//!
//! Opening a view shows cached data at once, refreshes it, and starts the
//! preloader over the refreshed list. Closing the view (or dropping the
//! session) aborts the run.

use std::sync::Arc;

use glint_cache::{CacheRead, Cacheable, TieredCache};
use glint_core::{GlintResult, Item, LoaderSettings, ParentId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::PreloadEvent;
use crate::fetcher::IncrementalFetcher;
use crate::gate::LoadGate;
use crate::preloader::SequentialPreloader;
use crate::source::PayloadSource;
use crate::state::{LoadSnapshot, RunPhase};

pub struct ViewerSession<M: Cacheable, H: Cacheable> {
    parent: ParentId,
    served_from_cache: bool,
    preloader: SequentialPreloader<M, H>,
    handle: Option<JoinHandle<GlintResult<RunPhase>>>,
}

impl<M: Cacheable, H: Cacheable> ViewerSession<M, H> {
    /// Open a view of `parent` and start preloading.
    ///
    /// A refresh failure falls back to the cached list. With nothing cached
    /// the failure is returned, since an empty list would complete the gate.
    pub async fn open(
        parent: ParentId,
        fetcher: &IncrementalFetcher<M, H>,
        payloads: Arc<dyn PayloadSource<H>>,
        cache: Arc<TieredCache>,
        settings: &LoaderSettings,
    ) -> GlintResult<Self> {
        let cached = fetcher.cached(parent).await?.map(CacheRead::into_value);
        let served_from_cache = cached.is_some();
        let existing = cached.unwrap_or_default();

        let items = match fetcher.refresh(parent, &existing).await {
            Ok(items) => items,
            Err(e) if served_from_cache => {
                tracing::warn!(
                    parent = %parent,
                    error = %e,
                    cached = existing.len(),
                    "Refresh failed, showing cached list"
                );
                existing
            }
            Err(e) => return Err(e),
        };

        let preloader = SequentialPreloader::with_event_capacity(
            parent,
            items,
            payloads,
            cache,
            settings.event_capacity,
        );
        let handle = preloader.start();
        tracing::debug!(parent = %parent, served_from_cache, "Viewer session opened");

        Ok(Self {
            parent,
            served_from_cache,
            preloader,
            handle: Some(handle),
        })
    }

    pub fn parent(&self) -> ParentId {
        self.parent
    }

    /// Whether a cached list existed when the view opened.
    pub fn served_from_cache(&self) -> bool {
        self.served_from_cache
    }

    pub fn preloader(&self) -> &SequentialPreloader<M, H> {
        &self.preloader
    }

    pub fn gate(&self) -> &LoadGate {
        self.preloader.gate()
    }

    pub fn items(&self) -> Vec<Item<M, H>> {
        self.preloader.items()
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        self.preloader.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PreloadEvent> {
        self.preloader.subscribe()
    }

    /// Wait for the background run to end. `None` if it was already awaited
    /// or did not finish cleanly.
    pub async fn finished(&mut self) -> Option<RunPhase> {
        let handle = self.handle.take()?;
        match handle.await {
            Ok(Ok(phase)) => Some(phase),
            Ok(Err(e)) => {
                tracing::warn!(parent = %self.parent, error = %e, "Preload run failed");
                None
            }
            Err(e) => {
                tracing::warn!(parent = %self.parent, error = %e, "Preload task did not finish");
                None
            }
        }
    }

    /// Close the view, aborting the run.
    pub fn close(self) {
        self.preloader.abort();
    }
}

impl<M: Cacheable, H: Cacheable> Drop for ViewerSession<M, H> {
    fn drop(&mut self) {
        self.preloader.abort();
        tracing::debug!(parent = %self.parent, "Viewer session closed");
    }
}
