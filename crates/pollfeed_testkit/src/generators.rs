//! Property-based test generators using proptest.

use pollfeed_protocol::Document;
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for document ids drawn from a small pool, so that consecutive
/// snapshots overlap.
pub fn document_id_strategy() -> impl Strategy<Value = String> {
    (0u8..16).prop_map(|n| format!("{n:02}"))
}

/// Strategy for a document with a few scalar fields.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (
        document_id_strategy(),
        prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..3),
    )
        .prop_map(|(id, fields)| {
            fields
                .into_iter()
                .fold(Document::new(id), |doc, (name, value)| {
                    doc.with_field(name, Value::from(value))
                })
        })
}

/// Strategy for one snapshot. Ids may repeat within a snapshot.
pub fn snapshot_strategy() -> impl Strategy<Value = Vec<Document>> {
    prop::collection::vec(document_strategy(), 0..8)
}

/// Strategy for a sequence of snapshots as seen by successive polls.
pub fn snapshot_sequence_strategy() -> impl Strategy<Value = Vec<Vec<Document>>> {
    prop::collection::vec(snapshot_strategy(), 1..8)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn ids_come_from_small_pool(id in document_id_strategy()) {
            prop_assert_eq!(id.len(), 2);
        }

        #[test]
        fn snapshots_stay_small(snapshots in snapshot_sequence_strategy()) {
            prop_assert!(!snapshots.is_empty());
            prop_assert!(snapshots.iter().all(|s| s.len() < 8));
        }
    }
}
