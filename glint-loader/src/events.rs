//! Preload progress events.
//!
//! The preloader never calls presentation code. It publishes these on a
//! broadcast channel; views subscribe and redraw. A subscriber that falls
//! behind the channel capacity lags and should re-read the snapshot.

use glint_core::ParentId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreloadEvent {
    Started {
        parent: ParentId,
        total: usize,
    },
    ItemLoading {
        parent: ParentId,
        index: usize,
        jump_ahead: bool,
    },
    ItemLoaded {
        parent: ParentId,
        index: usize,
        loaded: usize,
        total: usize,
    },
    ItemFailed {
        parent: ParentId,
        index: usize,
        reason: String,
    },
    Completed {
        parent: ParentId,
        loaded: usize,
        total: usize,
        failed: Vec<usize>,
    },
    Aborted {
        parent: ParentId,
        loaded: usize,
        total: usize,
    },
}

impl PreloadEvent {
    pub fn parent(&self) -> ParentId {
        match self {
            PreloadEvent::Started { parent, .. }
            | PreloadEvent::ItemLoading { parent, .. }
            | PreloadEvent::ItemLoaded { parent, .. }
            | PreloadEvent::ItemFailed { parent, .. }
            | PreloadEvent::Completed { parent, .. }
            | PreloadEvent::Aborted { parent, .. } => *parent,
        }
    }

    /// Get the event type as a string for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            PreloadEvent::Started { .. } => "started",
            PreloadEvent::ItemLoading { .. } => "item_loading",
            PreloadEvent::ItemLoaded { .. } => "item_loaded",
            PreloadEvent::ItemFailed { .. } => "item_failed",
            PreloadEvent::Completed { .. } => "completed",
            PreloadEvent::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PreloadEvent::Completed { .. } | PreloadEvent::Aborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let parent = ParentId::now_v7();
        let event = PreloadEvent::ItemLoaded {
            parent,
            index: 2,
            loaded: 3,
            total: 10,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "item_loaded");
        assert_eq!(json["index"], 2);
        assert_eq!(event.parent(), parent);
        assert_eq!(event.event_type(), "item_loaded");
        assert!(!event.is_terminal());
    }
}
