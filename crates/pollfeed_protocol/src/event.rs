//! Events delivered to subscribers.

use crate::document::Document;
use std::collections::BTreeSet;

/// A single subscriber-facing event.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A document id became visible.
    Added {
        /// Document id.
        id: String,
        /// Full document.
        doc: Document,
    },
    /// A visible document was seen again.
    Changed {
        /// Document id.
        id: String,
        /// Full document.
        doc: Document,
    },
    /// A visible document id disappeared.
    Removed {
        /// Document id.
        id: String,
    },
    /// The initial view is complete, or connectivity was regained.
    Ready,
}

impl FeedEvent {
    /// Returns the document id the event refers to, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            FeedEvent::Added { id, .. }
            | FeedEvent::Changed { id, .. }
            | FeedEvent::Removed { id } => Some(id),
            FeedEvent::Ready => None,
        }
    }

    /// Short lowercase name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::Added { .. } => "added",
            FeedEvent::Changed { .. } => "changed",
            FeedEvent::Removed { .. } => "removed",
            FeedEvent::Ready => "ready",
        }
    }
}

/// Rebuilds the visible id set from an event stream, starting empty.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a FeedEvent>) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for event in events {
        match event {
            FeedEvent::Added { id, .. } => {
                ids.insert(id.clone());
            }
            FeedEvent::Removed { id } => {
                ids.remove(id);
            }
            FeedEvent::Changed { .. } | FeedEvent::Ready => {}
        }
    }
    ids
}
