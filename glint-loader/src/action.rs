//! The dependent action, gated on full load.
//!
//! Analysis needs every item of a parent. Invoking it early is rejected
//! without any network call. One invocation per parent may be outstanding;
//! its guard is released however the call ends, including when the caller
//! drops the future.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use glint_cache::TieredCache;
use glint_core::{GateError, GlintResult, ParentId};
use serde::{Deserialize, Serialize};

use crate::gate::LoadGate;
use crate::namespaces::analysis_key;
use crate::source::DependentAction;

/// Options passed through to the action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOptions {
    /// Run even when a cached result exists.
    pub force: bool,
}

impl ActionOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Marks a parent as running until dropped.
struct InFlightGuard {
    running: Arc<Mutex<HashSet<ParentId>>>,
    parent: ParentId,
}

impl InFlightGuard {
    fn acquire(running: &Arc<Mutex<HashSet<ParentId>>>, parent: ParentId) -> GlintResult<Self> {
        let mut set = running.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(parent) {
            return Err(GateError::AlreadyRunning { parent }.into());
        }
        Ok(Self {
            running: Arc::clone(running),
            parent,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.parent);
    }
}

/// A [`DependentAction`] that only runs once its parent's gate is complete.
pub struct GatedAction<A> {
    action: Arc<A>,
    cache: Arc<TieredCache>,
    running: Arc<Mutex<HashSet<ParentId>>>,
}

impl<A> Clone for GatedAction<A> {
    fn clone(&self) -> Self {
        Self {
            action: Arc::clone(&self.action),
            cache: Arc::clone(&self.cache),
            running: Arc::clone(&self.running),
        }
    }
}

impl<A: DependentAction> GatedAction<A> {
    pub fn new(action: A, cache: Arc<TieredCache>) -> Self {
        Self {
            action: Arc::new(action),
            cache,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn is_running(&self, parent: ParentId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&parent)
    }

    /// Run the action for the gate's parent if the gate is complete.
    ///
    /// # Errors
    ///
    /// - `GateError::NotReady` while the gate is incomplete
    /// - `GateError::AlreadyRunning` while another call for the parent is out
    /// - whatever the action itself returns
    pub async fn invoke(&self, gate: &LoadGate, options: ActionOptions) -> GlintResult<A::Output> {
        let parent = gate.parent();
        if !gate.is_complete() {
            tracing::debug!(
                parent = %parent,
                loaded = gate.loaded(),
                total = gate.total(),
                "Dependent action rejected, items still loading"
            );
            return Err(GateError::NotReady {
                parent,
                loaded: gate.loaded(),
                total: gate.total(),
            }
            .into());
        }

        let _guard = InFlightGuard::acquire(&self.running, parent)?;
        let key = analysis_key(parent);

        if !options.force {
            if let Some(read) = self.cache.get::<A::Output>(&key).await? {
                tracing::debug!(parent = %parent, "Serving cached analysis result");
                return Ok(read.into_value());
            }
        }

        tracing::info!(parent = %parent, force = options.force, "Running dependent action");
        let output = self
            .action
            .trigger(parent, &options)
            .await
            .inspect_err(|e| {
                tracing::warn!(parent = %parent, error = %e, "Dependent action failed");
            })?;

        self.cache.set(&key, output.clone(), None).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DependentAction for Counting {
        type Output = u32;

        async fn trigger(&self, _parent: ParentId, _options: &ActionOptions) -> GlintResult<u32> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn action() -> GatedAction<Counting> {
        GatedAction::new(
            Counting {
                calls: AtomicU32::new(0),
            },
            Arc::new(TieredCache::in_memory(Duration::from_secs(600))),
        )
    }

    fn complete_gate(parent: ParentId) -> LoadGate {
        let gate = LoadGate::new(parent, 1);
        if let Some(completion) = gate.advance(1) {
            completion.fire();
        }
        gate
    }

    #[tokio::test]
    async fn test_incomplete_gate_rejects_without_calling() {
        let action = action();
        let parent = ParentId::now_v7();
        let gate = LoadGate::new(parent, 3);

        let err = action
            .invoke(&gate, ActionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_ready());
        assert_eq!(action.action.calls.load(Ordering::SeqCst), 0);
        assert!(!action.is_running(parent));
    }

    #[tokio::test]
    async fn test_cached_result_unless_forced() {
        let action = action();
        let parent = ParentId::now_v7();
        let gate = complete_gate(parent);

        let first = action.invoke(&gate, ActionOptions::default()).await;
        let second = action.invoke(&gate, ActionOptions::default()).await;
        let forced = action.invoke(&gate, ActionOptions::forced()).await;

        assert_eq!(first.expect("first"), 1);
        assert_eq!(second.expect("cached"), 1);
        assert_eq!(forced.expect("forced"), 2);
        assert!(!action.is_running(parent));
    }

    #[tokio::test]
    async fn test_result_belongs_to_gate_parent() {
        let action = action();
        let loaded = ParentId::now_v7();
        let loading = ParentId::now_v7();

        action
            .invoke(&complete_gate(loaded), ActionOptions::default())
            .await
            .expect("complete gate runs");
        let err = action
            .invoke(&LoadGate::new(loading, 2), ActionOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            glint_core::GlintError::Gate(GateError::NotReady { parent, .. }) if parent == loading
        ));
        assert!(action
            .cache
            .get::<u32>(&analysis_key(loaded))
            .await
            .expect("cache read")
            .is_some());
        assert!(action
            .cache
            .get::<u32>(&analysis_key(loading))
            .await
            .expect("cache read")
            .is_none());
    }

    #[test]
    fn test_guard_released_on_drop() {
        let running = Arc::new(Mutex::new(HashSet::new()));
        let parent = ParentId::now_v7();

        let guard = InFlightGuard::acquire(&running, parent).expect("first acquire");
        assert!(InFlightGuard::acquire(&running, parent).is_err());
        drop(guard);
        assert!(InFlightGuard::acquire(&running, parent).is_ok());
    }
}
