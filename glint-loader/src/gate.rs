//! Completion gate.
//!
//! One gate per preload run. It flips to complete exactly once, the first
//! time every item is loaded, and stays complete. An abort that lands first
//! closes it for good: it never completes and its callbacks never run.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use glint_core::{GateError, GlintResult, ParentId};
use tokio::sync::watch;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateSignal {
    Pending,
    Complete,
    Aborted,
}

struct GateInner {
    parent: ParentId,
    total: usize,
    loaded: AtomicUsize,
    signal: watch::Sender<GateSignal>,
    /// Also serializes signal transitions, so a callback registered while
    /// the gate completes is either queued before or fired directly.
    callbacks: Mutex<Vec<Callback>>,
}

/// Callbacks taken from a gate that just completed, to be run once the
/// caller has released its own locks.
#[must_use]
pub(crate) struct Completion(Vec<Callback>);

impl Completion {
    pub(crate) fn fire(self) {
        for callback in self.0 {
            callback();
        }
    }
}

/// "Fully loaded" signal for one parent.
#[derive(Clone)]
pub struct LoadGate {
    inner: Arc<GateInner>,
}

impl LoadGate {
    pub fn new(parent: ParentId, total: usize) -> Self {
        Self::starting_at(parent, total, 0)
    }

    /// Gate over a list of which `loaded` items already carry payloads.
    /// It still completes only through [`advance`](Self::advance).
    pub(crate) fn starting_at(parent: ParentId, total: usize, loaded: usize) -> Self {
        let (signal, _rx) = watch::channel(GateSignal::Pending);
        Self {
            inner: Arc::new(GateInner {
                parent,
                total,
                loaded: AtomicUsize::new(loaded),
                signal,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn parent(&self) -> ParentId {
        self.inner.parent
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    pub fn loaded(&self) -> usize {
        self.inner.loaded.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.signal.borrow() == GateSignal::Complete
    }

    pub fn is_aborted(&self) -> bool {
        *self.inner.signal.borrow() == GateSignal::Aborted
    }

    /// Run `callback` once, when the gate completes. Fires immediately if it
    /// already has; is dropped unrun if the gate was aborted.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let signal = *self.inner.signal.borrow();
        match signal {
            GateSignal::Pending => callbacks.push(Box::new(callback)),
            GateSignal::Complete => {
                drop(callbacks);
                callback();
            }
            GateSignal::Aborted => {}
        }
    }

    /// Resolve once the gate completes, or fail if the run aborts first.
    pub async fn wait_complete(&self) -> GlintResult<()> {
        let mut rx = self.inner.signal.subscribe();
        loop {
            let signal = *rx.borrow_and_update();
            match signal {
                GateSignal::Complete => return Ok(()),
                GateSignal::Aborted => break,
                GateSignal::Pending => {}
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        Err(GateError::Aborted {
            parent: self.inner.parent,
        }
        .into())
    }

    /// Publish the loaded count. Returns the callbacks to fire if this call
    /// completed the gate.
    pub(crate) fn advance(&self, loaded: usize) -> Option<Completion> {
        self.inner.loaded.store(loaded, Ordering::Release);
        if loaded < self.inner.total {
            return None;
        }

        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *self.inner.signal.borrow() != GateSignal::Pending {
            return None;
        }
        self.inner.signal.send_replace(GateSignal::Complete);
        Some(Completion(std::mem::take(&mut *callbacks)))
    }

    /// Close the gate without completing it. No effect once complete.
    pub(crate) fn abort(&self) -> bool {
        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *self.inner.signal.borrow() != GateSignal::Pending {
            return false;
        }
        self.inner.signal.send_replace(GateSignal::Aborted);
        callbacks.clear();
        true
    }
}

impl fmt::Debug for LoadGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadGate")
            .field("parent", &self.inner.parent)
            .field("loaded", &self.loaded())
            .field("total", &self.inner.total)
            .field("signal", &*self.inner.signal.borrow())
            .finish()
    }
}
