//! GLINT Test Utilities
//!
//! Shared test infrastructure for the GLINT workspace:
//! - Scripted mock collaborators (item source, payload source, analysis)
//! - Test fixtures for common scenarios
//! - Proptest generators
//! - Custom assertions

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

// Re-export core types for convenience
pub use glint_cache::TieredCache;
pub use glint_core::{
    GateError, GlintError, GlintResult, Item, ItemId, ParentId, Payload, Timestamp,
    TransportError,
};
pub use glint_loader::{ActionOptions, DependentAction, ItemSource, PayloadSource};

// ============================================================================
// TEST DOMAIN
// ============================================================================

/// Metadata of a capture in tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub title: String,
}

/// Heavy payload of a capture in tests. Carries the id of the item it
/// belongs to, so a payload attached to the wrong item is visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub item: ItemId,
    pub url: String,
}

impl Screenshot {
    pub fn of(item: impl Into<ItemId>) -> Self {
        let item = item.into();
        Self {
            item,
            url: format!("https://cdn.glint.test/shots/{item}.webp"),
        }
    }
}

pub type TestItem = Item<CaptureMeta, Screenshot>;

/// Result of the mock analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub parent: ParentId,
    pub run: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A point where a mock call parks until the test releases it.
#[derive(Debug, Default)]
struct Hold {
    entered: Notify,
    release: Notify,
}

impl Hold {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Item source serving a fixed newest-first list.
#[derive(Debug, Default)]
pub struct ScriptedItemSource {
    items: Mutex<Vec<TestItem>>,
    failing: AtomicBool,
    page_calls: AtomicUsize,
    since_calls: AtomicUsize,
    cursors: Mutex<Vec<Timestamp>>,
}

impl ScriptedItemSource {
    pub fn new(items: Vec<TestItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    /// Items created on the server after the list was first served.
    pub fn publish_newer(&self, newer: Vec<TestItem>) {
        let mut items = lock(&self.items);
        let mut updated = newer;
        updated.append(&mut items);
        *items = updated;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn since_calls(&self) -> usize {
        self.since_calls.load(Ordering::SeqCst)
    }

    /// Cursors passed to `fetch_since`, in call order.
    pub fn cursors(&self) -> Vec<Timestamp> {
        lock(&self.cursors).clone()
    }

    fn check_failing(&self, parent: ParentId) -> GlintResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::MetadataFetch {
                parent,
                reason: "connection reset".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ItemSource<CaptureMeta, Screenshot> for ScriptedItemSource {
    async fn fetch_page(
        &self,
        parent: ParentId,
        limit: usize,
        offset: usize,
    ) -> GlintResult<Vec<TestItem>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing(parent)?;
        Ok(lock(&self.items)
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_since(&self, parent: ParentId, cursor: Timestamp) -> GlintResult<Vec<TestItem>> {
        self.since_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.cursors).push(cursor);
        self.check_failing(parent)?;
        Ok(lock(&self.items)
            .iter()
            .filter(|item| item.created_at > cursor)
            .cloned()
            .collect())
    }
}

/// Payload source returning [`Screenshot::of`] the requested item, with
/// failures and holds scripted by list position.
#[derive(Debug, Default)]
pub struct ScriptedPayloadSource {
    failing: Mutex<HashSet<usize>>,
    holds: Mutex<HashMap<usize, Arc<Hold>>>,
    calls: Mutex<Vec<usize>>,
    fetched_items: Mutex<Vec<ItemId>>,
}

impl ScriptedPayloadSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every fetch of `index` until [`recover`](Self::recover).
    pub fn fail(&self, index: usize) {
        lock(&self.failing).insert(index);
    }

    pub fn recover(&self, index: usize) {
        lock(&self.failing).remove(&index);
    }

    /// Park the next fetch of `index` until [`release`](Self::release).
    pub fn hold(&self, index: usize) {
        lock(&self.holds).insert(index, Arc::new(Hold::default()));
    }

    /// Wait until a fetch of a held `index` has started.
    pub async fn wait_entered(&self, index: usize) {
        let hold = lock(&self.holds).get(&index).cloned();
        if let Some(hold) = hold {
            hold.entered.notified().await;
        }
    }

    pub fn release(&self, index: usize) {
        if let Some(hold) = lock(&self.holds).get(&index) {
            hold.release.notify_one();
        }
    }

    /// Indices fetched, in the order the fetches started.
    pub fn calls(&self) -> Vec<usize> {
        lock(&self.calls).clone()
    }

    pub fn fetch_count(&self, index: usize) -> usize {
        lock(&self.calls).iter().filter(|i| **i == index).count()
    }

    /// Item ids fetched, in the order the fetches started.
    pub fn fetched_items(&self) -> Vec<ItemId> {
        lock(&self.fetched_items).clone()
    }
}

#[async_trait]
impl PayloadSource<Screenshot> for ScriptedPayloadSource {
    async fn fetch_payload(
        &self,
        parent: ParentId,
        item: ItemId,
        index: usize,
    ) -> GlintResult<Screenshot> {
        lock(&self.calls).push(index);
        lock(&self.fetched_items).push(item);

        let hold = lock(&self.holds).get(&index).cloned();
        if let Some(hold) = hold {
            hold.pass().await;
            lock(&self.holds).remove(&index);
        }

        if lock(&self.failing).contains(&index) {
            return Err(TransportError::PayloadFetch {
                parent,
                index,
                reason: "503 from media host".to_string(),
            }
            .into());
        }
        Ok(Screenshot::of(item))
    }
}

/// Analysis stand-in that counts its runs.
#[derive(Debug, Default)]
pub struct MockAnalysis {
    calls: AtomicU32,
    failing: AtomicBool,
    hold: Option<Hold>,
}

impl MockAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every trigger parks until [`release`](Self::release).
    pub fn held() -> Self {
        Self {
            hold: Some(Hold::default()),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_entered(&self) {
        if let Some(hold) = &self.hold {
            hold.entered.notified().await;
        }
    }

    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.release.notify_one();
        }
    }
}

#[async_trait]
impl DependentAction for MockAnalysis {
    type Output = AnalysisReport;

    async fn trigger(&self, parent: ParentId, _options: &ActionOptions) -> GlintResult<AnalysisReport> {
        let run = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hold) = &self.hold {
            hold.pass().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::ActionFailed {
                parent,
                reason: "model overloaded".to_string(),
            }
            .into());
        }
        Ok(AnalysisReport { parent, run })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for GLINT types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random ParentId.
    pub fn arb_parent_id() -> impl Strategy<Value = ParentId> {
        any::<[u8; 16]>().prop_map(|bytes| ParentId::new(Uuid::from_bytes(bytes)))
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Distinct item ids, newest (largest) first.
    pub fn arb_newest_first_ids(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
        proptest::collection::hash_set(0i64..10_000, 0..=max_len).prop_map(|ids| {
            let mut ids: Vec<i64> = ids.into_iter().collect();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            ids
        })
    }

    /// A newest-first item list.
    pub fn arb_item_list(max_len: usize) -> impl Strategy<Value = Vec<TestItem>> {
        arb_newest_first_ids(max_len).prop_map(|ids| super::fixtures::timeline(&ids))
    }

    /// A list length and a subset of its indices.
    pub fn arb_len_and_subset(max_len: usize) -> impl Strategy<Value = (usize, HashSet<usize>)> {
        (1..=max_len).prop_flat_map(|len| {
            (
                Just(len),
                proptest::collection::hash_set(0..len, 0..=len),
            )
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Common test fixtures.

    use super::*;
    use chrono::{DateTime, Duration, Utc};

    /// Fixed reference time; item `id` is created `id` minutes after it.
    pub fn base_time() -> Timestamp {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now)
    }

    /// One unloaded item. Larger ids are newer.
    pub fn item(id: i64) -> TestItem {
        Item::new(
            id,
            0,
            CaptureMeta {
                title: format!("capture {id}"),
            },
            base_time() + Duration::minutes(id),
        )
    }

    /// Items in the given order, indexed by position.
    pub fn timeline(ids: &[i64]) -> Vec<TestItem> {
        ids.iter()
            .enumerate()
            .map(|(position, id)| {
                let mut item = item(*id);
                item.index = position;
                item
            })
            .collect()
    }

    /// Items `count-1 ..= 0`, newest first.
    pub fn captures(count: usize) -> Vec<TestItem> {
        let ids: Vec<i64> = (0..count as i64).rev().collect();
        timeline(&ids)
    }

    /// In-memory cache with the stock ten minute TTL.
    pub fn cache() -> Arc<TieredCache> {
        Arc::new(TieredCache::in_memory(std::time::Duration::from_secs(600)))
    }

    pub fn parent() -> ParentId {
        ParentId::now_v7()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for GLINT lists.

    use super::*;

    /// Assert a list holds exactly `expected` ids, in order.
    pub fn assert_ids<M, H>(items: &[Item<M, H>], expected: &[i64]) {
        let ids: Vec<i64> = items.iter().map(|item| item.id.get()).collect();
        assert_eq!(ids, expected, "Unexpected item ids");
    }

    /// Assert every item's index equals its position.
    pub fn assert_indexed_by_position<M, H>(items: &[Item<M, H>]) {
        for (position, item) in items.iter().enumerate() {
            assert_eq!(
                item.index, position,
                "Item {} has index {} at position {}",
                item.id, item.index, position
            );
        }
    }

    /// Assert no id appears twice.
    pub fn assert_unique_ids<M, H>(items: &[Item<M, H>]) {
        let mut seen = HashSet::new();
        for item in items {
            assert!(seen.insert(item.id), "Duplicate item id {}", item.id);
        }
    }

    /// Assert the error is a gate rejection for an incomplete load.
    pub fn assert_not_ready<T: std::fmt::Debug>(result: &GlintResult<T>) {
        assert!(
            matches!(result, Err(GlintError::Gate(GateError::NotReady { .. }))),
            "Expected NotReady, got {:?}",
            result
        );
    }

    /// Assert the error is retryable.
    pub fn assert_retryable<T: std::fmt::Debug>(result: &GlintResult<T>) {
        match result {
            Err(e) => assert!(e.is_retryable(), "Expected retryable error, got {:?}", e),
            Ok(v) => panic!("Expected error, got Ok({:?})", v),
        }
    }
}
