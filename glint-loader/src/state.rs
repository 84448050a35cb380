//! Per-run preload state.

use std::collections::BTreeSet;
use std::fmt;

use glint_core::{reindex, Item, ItemId, ParentId, Payload};
use serde::Serialize;

/// Lifecycle of one preload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Loading,
    Complete,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Aborted)
    }
}

/// Where one item stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    Loaded,
    Failed,
}

/// Result of an on-demand load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpOutcome {
    /// Payload was already present; nothing fetched.
    AlreadyLoaded,
    /// Another load of the same item is running; nothing fetched.
    AlreadyInFlight,
    /// Loaded now.
    Loaded,
    /// The fetch failed; the item is marked failed.
    Failed,
    /// The run was aborted; nothing recorded.
    Aborted,
}

/// Which path started a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadPath {
    Sequential,
    JumpAhead,
}

/// Answer to "may this item start loading now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Go,
    AlreadyLoaded,
    AlreadyInFlight,
    Aborted,
}

/// Mutable state of one run over a fixed list.
///
/// `loaded` only grows, and nothing is added to it once `aborted` is set.
/// `currently_loading` is the sequential cursor; on-demand loads in flight
/// live in `jump_ahead`.
#[derive(Debug, Clone)]
pub struct LoadState<M, H> {
    items: Vec<Item<M, H>>,
    loaded: BTreeSet<usize>,
    failed: BTreeSet<usize>,
    currently_loading: Option<usize>,
    jump_ahead: BTreeSet<usize>,
    aborted: bool,
    phase: RunPhase,
}

impl<M, H> LoadState<M, H> {
    /// State over `items`, indexed by position. Items that already carry a
    /// payload count as loaded.
    pub fn new(mut items: Vec<Item<M, H>>) -> Self {
        reindex(&mut items);
        let loaded = items
            .iter()
            .filter(|item| item.is_loaded())
            .map(|item| item.index)
            .collect();
        Self {
            items,
            loaded,
            failed: BTreeSet::new(),
            currently_loading: None,
            jump_ahead: BTreeSet::new(),
            aborted: false,
            phase: RunPhase::Idle,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.loaded.contains(&index)
    }

    pub fn is_in_flight(&self, index: usize) -> bool {
        self.currently_loading == Some(index) || self.jump_ahead.contains(&index)
    }

    /// True once every item is loaded, unless the run was aborted first.
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.loaded.len() == self.items.len()
    }

    pub fn currently_loading(&self) -> Option<usize> {
        self.currently_loading
    }

    pub fn loaded(&self) -> &BTreeSet<usize> {
        &self.loaded
    }

    pub fn failed(&self) -> &BTreeSet<usize> {
        &self.failed
    }

    pub fn items(&self) -> &[Item<M, H>] {
        &self.items
    }

    pub fn item_id(&self, index: usize) -> Option<ItemId> {
        self.items.get(index).map(|item| item.id)
    }

    pub fn status(&self, index: usize) -> Option<ItemStatus> {
        if index >= self.items.len() {
            return None;
        }
        let status = if self.loaded.contains(&index) {
            ItemStatus::Loaded
        } else if self.is_in_flight(index) {
            ItemStatus::InFlight
        } else if self.failed.contains(&index) {
            ItemStatus::Failed
        } else {
            ItemStatus::Pending
        };
        Some(status)
    }

    pub fn payload(&self, index: usize) -> Option<&H> {
        self.items.get(index).and_then(|item| item.payload.as_loaded())
    }

    pub fn snapshot(&self, parent: ParentId) -> LoadSnapshot {
        LoadSnapshot {
            parent,
            total: self.items.len(),
            loaded: self.loaded.len(),
            failed: self.failed.iter().copied().collect(),
            current: self.currently_loading,
            jump_ahead: self.jump_ahead.iter().copied().collect(),
            phase: self.phase,
        }
    }

    pub(crate) fn mark_started(&mut self) {
        if self.phase == RunPhase::Idle {
            self.phase = RunPhase::Loading;
        }
    }

    pub(crate) fn admit(&mut self, index: usize, path: LoadPath) -> Admission {
        if self.aborted {
            return Admission::Aborted;
        }
        if self.loaded.contains(&index) {
            return Admission::AlreadyLoaded;
        }
        if self.is_in_flight(index) {
            return Admission::AlreadyInFlight;
        }
        match path {
            LoadPath::Sequential => self.currently_loading = Some(index),
            LoadPath::JumpAhead => {
                self.jump_ahead.insert(index);
            }
        }
        Admission::Go
    }

    /// Record a fetched payload. Returns false (and records nothing) once
    /// the run is aborted.
    pub(crate) fn record_loaded(&mut self, index: usize, payload: H, path: LoadPath) -> bool {
        self.clear_in_flight(index, path);
        if self.aborted {
            return false;
        }
        if let Some(item) = self.items.get_mut(index) {
            item.payload = Payload::Loaded(payload);
        }
        self.failed.remove(&index);
        self.loaded.insert(index);
        true
    }

    pub(crate) fn record_failed(&mut self, index: usize, path: LoadPath) -> bool {
        self.clear_in_flight(index, path);
        if self.aborted {
            return false;
        }
        self.failed.insert(index);
        true
    }

    /// Close the sequential pass.
    pub(crate) fn finish_run(&mut self) -> RunPhase {
        self.currently_loading = None;
        if !self.aborted {
            self.phase = RunPhase::Complete;
        }
        self.phase
    }

    /// Set the aborted flag. A fully loaded run is left alone. Returns
    /// whether anything changed.
    pub(crate) fn abort(&mut self) -> bool {
        if self.aborted || self.is_complete() {
            return false;
        }
        self.aborted = true;
        self.phase = RunPhase::Aborted;
        true
    }

    fn clear_in_flight(&mut self, index: usize, path: LoadPath) {
        match path {
            LoadPath::Sequential => {
                if self.currently_loading == Some(index) {
                    self.currently_loading = None;
                }
            }
            LoadPath::JumpAhead => {
                self.jump_ahead.remove(&index);
            }
        }
    }
}

/// Point-in-time view of a run, for progress displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSnapshot {
    pub parent: ParentId,
    pub total: usize,
    pub loaded: usize,
    pub failed: Vec<usize>,
    pub current: Option<usize>,
    pub jump_ahead: Vec<usize>,
    pub phase: RunPhase,
}

impl LoadSnapshot {
    /// Fraction loaded, 0.0 to 1.0. An empty run counts as fully loaded.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.loaded as f64 / self.total as f64
        }
    }
}

impl fmt::Display for LoadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} loaded", self.loaded, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(n: usize) -> LoadState<(), u32> {
        let items = (0..n)
            .map(|i| Item::new(i as i64, i, (), Utc::now()))
            .collect();
        LoadState::new(items)
    }

    #[test]
    fn test_sequential_admission_and_record() {
        let mut st = state(3);
        assert_eq!(st.admit(0, LoadPath::Sequential), Admission::Go);
        assert_eq!(st.currently_loading(), Some(0));
        assert_eq!(st.status(0), Some(ItemStatus::InFlight));

        assert!(st.record_loaded(0, 10, LoadPath::Sequential));
        assert_eq!(st.currently_loading(), None);
        assert_eq!(st.payload(0), Some(&10));
        assert_eq!(st.admit(0, LoadPath::JumpAhead), Admission::AlreadyLoaded);
    }

    #[test]
    fn test_jump_ahead_blocks_sequential_for_same_index() {
        let mut st = state(3);
        assert_eq!(st.admit(2, LoadPath::JumpAhead), Admission::Go);
        assert_eq!(st.currently_loading(), None);
        assert_eq!(st.admit(2, LoadPath::Sequential), Admission::AlreadyInFlight);
        assert_eq!(st.admit(2, LoadPath::JumpAhead), Admission::AlreadyInFlight);
    }

    #[test]
    fn test_failure_then_success_clears_failed() {
        let mut st = state(2);
        st.admit(1, LoadPath::Sequential);
        assert!(st.record_failed(1, LoadPath::Sequential));
        assert_eq!(st.status(1), Some(ItemStatus::Failed));

        st.admit(1, LoadPath::JumpAhead);
        assert!(st.record_loaded(1, 7, LoadPath::JumpAhead));
        assert!(st.failed().is_empty());
        assert_eq!(st.status(1), Some(ItemStatus::Loaded));
    }

    #[test]
    fn test_nothing_recorded_after_abort() {
        let mut st = state(3);
        st.mark_started();
        st.admit(0, LoadPath::Sequential);
        assert!(st.abort());

        assert!(!st.record_loaded(0, 1, LoadPath::Sequential));
        assert_eq!(st.loaded_count(), 0);
        assert_eq!(st.admit(1, LoadPath::JumpAhead), Admission::Aborted);
        assert_eq!(st.finish_run(), RunPhase::Aborted);
        assert!(!st.is_complete());
    }

    #[test]
    fn test_abort_after_full_load_is_ignored() {
        let mut st = state(1);
        st.admit(0, LoadPath::Sequential);
        st.record_loaded(0, 1, LoadPath::Sequential);
        assert_eq!(st.finish_run(), RunPhase::Complete);

        assert!(!st.abort());
        assert!(st.is_complete());
        assert_eq!(st.phase(), RunPhase::Complete);
    }

    #[test]
    fn test_items_with_payload_start_loaded() {
        let items = vec![
            Item::new(1, 0, (), Utc::now()).with_payload(5u32),
            Item::new(2, 1, (), Utc::now()),
        ];
        let st = LoadState::new(items);
        assert!(st.is_loaded(0));
        assert!(!st.is_loaded(1));
    }

    #[test]
    fn test_snapshot_display() {
        let mut st = state(4);
        st.admit(0, LoadPath::Sequential);
        st.record_loaded(0, 1, LoadPath::Sequential);
        let snapshot = st.snapshot(ParentId::now_v7());
        assert_eq!(snapshot.to_string(), "1 of 4 loaded");
        assert!((snapshot.progress() - 0.25).abs() < f64::EPSILON);
        assert!(st.status(4).is_none());
    }
}
