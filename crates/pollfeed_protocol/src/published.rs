//! Published id membership and snapshot diffing.

use crate::document::Document;
use crate::event::FeedEvent;
use std::collections::BTreeSet;

/// The ids a subscriber currently believes are present.
///
/// Mirrors exactly the ids that have been emitted as added and not yet
/// removed. It is only mutated through [`PublishedSet::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedSet {
    ids: BTreeSet<String>,
}

impl PublishedSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `id` is published.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns the number of published ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing is published.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterates the published ids in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Returns a copy of the published ids.
    pub fn to_ids(&self) -> BTreeSet<String> {
        self.ids.clone()
    }

    /// Applies a delta computed against this set.
    pub fn apply(&mut self, delta: &Delta) {
        for upsert in &delta.upserts {
            if let Upsert::Added(doc) = upsert {
                self.ids.insert(doc.id.clone());
            }
        }
        for id in &delta.removed {
            self.ids.remove(id);
        }
    }
}

/// One document of a snapshot, classified against the published set.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// The id was not published before.
    Added(Document),
    /// The id was already published.
    Changed(Document),
}

/// Difference between a published set and a fresh snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// Snapshot documents in snapshot order.
    pub upserts: Vec<Upsert>,
    /// Published ids absent from the snapshot, in sorted order.
    pub removed: Vec<String>,
}

impl Delta {
    /// Ids that were not published before (`fetched − published`).
    pub fn added_ids(&self) -> impl Iterator<Item = &str> {
        self.upserts.iter().filter_map(|u| match u {
            Upsert::Added(doc) => Some(doc.id.as_str()),
            Upsert::Changed(_) => None,
        })
    }

    /// Ids present on both sides (`fetched ∩ published`).
    pub fn kept_ids(&self) -> impl Iterator<Item = &str> {
        self.upserts.iter().filter_map(|u| match u {
            Upsert::Changed(doc) => Some(doc.id.as_str()),
            Upsert::Added(_) => None,
        })
    }

    /// Returns true if the delta carries no events.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removed.is_empty()
    }

    /// Converts the delta into events: upserts in snapshot order, then removals.
    pub fn into_events(self) -> Vec<FeedEvent> {
        let mut events = Vec::with_capacity(self.upserts.len() + self.removed.len());
        for upsert in self.upserts {
            events.push(match upsert {
                Upsert::Added(doc) => FeedEvent::Added {
                    id: doc.id.clone(),
                    doc,
                },
                Upsert::Changed(doc) => FeedEvent::Changed {
                    id: doc.id.clone(),
                    doc,
                },
            });
        }
        events.extend(self.removed.into_iter().map(|id| FeedEvent::Removed { id }));
        events
    }
}

/// Diffs a snapshot against the published set.
///
/// Content is never compared: every document whose id is already published is
/// reported as changed. If the snapshot repeats an id, the first occurrence
/// decides added vs. changed and later occurrences are changes.
pub fn diff(published: &PublishedSet, snapshot: Vec<Document>) -> Delta {
    let fetched: BTreeSet<&str> = snapshot.iter().map(|doc| doc.id.as_str()).collect();
    let removed = published
        .ids
        .iter()
        .filter(|id| !fetched.contains(id.as_str()))
        .cloned()
        .collect();

    let mut seen = BTreeSet::new();
    let mut upserts = Vec::with_capacity(snapshot.len());
    for doc in snapshot {
        if published.contains(&doc.id) || !seen.insert(doc.id.clone()) {
            upserts.push(Upsert::Changed(doc));
        } else {
            upserts.push(Upsert::Added(doc));
        }
    }

    Delta { upserts, removed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(ids: &[&str]) -> Vec<Document> {
        ids.iter().map(|id| Document::new(*id)).collect()
    }

    fn published(ids: &[&str]) -> PublishedSet {
        let mut set = PublishedSet::new();
        set.apply(&diff(&PublishedSet::new(), docs(ids)));
        set
    }

    #[test]
    fn first_snapshot_adds_everything() {
        let delta = diff(&PublishedSet::new(), docs(&["0", "1", "2", "3"]));
        assert_eq!(delta.added_ids().collect::<Vec<_>>(), ["0", "1", "2", "3"]);
        assert_eq!(delta.kept_ids().count(), 0);
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn rotating_window() {
        let set = published(&["0", "1", "2", "3"]);
        let delta = diff(&set, docs(&["1", "2", "3", "4"]));

        assert_eq!(delta.removed, ["0"]);
        assert_eq!(delta.kept_ids().collect::<Vec<_>>(), ["1", "2", "3"]);
        assert_eq!(delta.added_ids().collect::<Vec<_>>(), ["4"]);
    }

    #[test]
    fn unchanged_snapshot_reports_every_id_changed() {
        let set = published(&["a", "b"]);
        let delta = diff(&set, docs(&["a", "b"]));
        assert_eq!(delta.kept_ids().count(), 2);
        assert_eq!(delta.added_ids().count(), 0);
        assert!(delta.removed.is_empty());
        assert!(!delta.is_empty());
    }

    #[test]
    fn empty_snapshot_removes_everything() {
        let set = published(&["x", "y"]);
        let delta = diff(&set, Vec::new());
        assert!(delta.upserts.is_empty());
        assert_eq!(delta.removed, ["x", "y"]);

        let mut set = set;
        set.apply(&delta);
        assert!(set.is_empty());
    }

    #[test]
    fn repeated_id_is_added_once() {
        let delta = diff(&PublishedSet::new(), docs(&["7", "7"]));
        assert_eq!(delta.added_ids().collect::<Vec<_>>(), ["7"]);
        assert_eq!(delta.kept_ids().collect::<Vec<_>>(), ["7"]);
    }

    #[test]
    fn apply_tracks_membership() {
        let mut set = published(&["0", "1", "2", "3"]);
        let delta = diff(&set, docs(&["1", "2", "3", "4"]));
        set.apply(&delta);
        assert_eq!(set.iter().collect::<Vec<_>>(), ["1", "2", "3", "4"]);
    }

    #[test]
    fn events_follow_snapshot_order_then_removals() {
        let set = published(&["0", "1"]);
        let events = diff(&set, docs(&["2", "1"])).into_events();
        assert_eq!(
            events,
            vec![
                FeedEvent::Added {
                    id: "2".into(),
                    doc: Document::new("2"),
                },
                FeedEvent::Changed {
                    id: "1".into(),
                    doc: Document::new("1"),
                },
                FeedEvent::Removed { id: "0".into() },
            ]
        );
    }
}
