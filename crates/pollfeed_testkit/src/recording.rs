//! Recorders for subscriber events and report lines.

use parking_lot::Mutex;
use pollfeed_engine::{ReportLine, ReportSink, Subscriber};
use pollfeed_protocol::{replay, Document, FeedEvent};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A subscriber that records every event it receives.
#[derive(Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<(String, FeedEvent)>>,
}

impl RecordingSubscriber {
    /// Creates a shared recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every event recorded so far, without collections.
    pub fn events(&self) -> Vec<FeedEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Returns every event recorded so far, with the collection it came from.
    /// `Ready` carries an empty collection.
    pub fn events_with_collection(&self) -> Vec<(String, FeedEvent)> {
        self.events.lock().clone()
    }

    /// Removes and returns the recorded events.
    pub fn take(&self) -> Vec<FeedEvent> {
        std::mem::take(&mut *self.events.lock())
            .into_iter()
            .map(|(_, e)| e)
            .collect()
    }

    /// Removes the recorded events and renders them as `"kind id"` strings.
    pub fn take_labels(&self) -> Vec<String> {
        self.take().iter().map(label).collect()
    }

    /// Number of `ready` events recorded.
    pub fn ready_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| matches!(e, FeedEvent::Ready))
            .count()
    }

    /// Replays the recorded events into the set of visible ids.
    pub fn visible(&self) -> BTreeSet<String> {
        replay(&self.events())
    }

    fn push(&self, collection: &str, event: FeedEvent) {
        self.events.lock().push((collection.to_string(), event));
    }
}

impl Subscriber for RecordingSubscriber {
    fn added(&self, collection: &str, id: &str, doc: &Document) {
        self.push(
            collection,
            FeedEvent::Added {
                id: id.to_string(),
                doc: doc.clone(),
            },
        );
    }

    fn changed(&self, collection: &str, id: &str, doc: &Document) {
        self.push(
            collection,
            FeedEvent::Changed {
                id: id.to_string(),
                doc: doc.clone(),
            },
        );
    }

    fn removed(&self, collection: &str, id: &str) {
        self.push(collection, FeedEvent::Removed { id: id.to_string() });
    }

    fn ready(&self) {
        self.push("", FeedEvent::Ready);
    }
}

/// Renders an event as `"kind id"`, or `"ready"`.
pub fn label(event: &FeedEvent) -> String {
    match event.id() {
        Some(id) => format!("{} {id}", event.kind()),
        None => event.kind().to_string(),
    }
}

/// A report sink that records every line.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<ReportLine>>,
}

impl RecordingSink {
    /// Creates a shared sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every line recorded so far.
    pub fn lines(&self) -> Vec<ReportLine> {
        self.lines.lock().clone()
    }

    /// Returns the surfaced lines for `source`.
    pub fn surfaced(&self, source: &str) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter_map(|line| match line {
                ReportLine::Surfaced { source: s, message } if s == source => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Returns the digest lines for `source` as `(message, count)`.
    pub fn digests(&self, source: &str) -> Vec<(String, u64)> {
        self.lines
            .lock()
            .iter()
            .filter_map(|line| match line {
                ReportLine::Digest {
                    source: s,
                    message,
                    count,
                    ..
                } if s == source => Some((message.clone(), *count)),
                _ => None,
            })
            .collect()
    }
}

impl ReportSink for RecordingSink {
    fn emit(&self, line: ReportLine) {
        self.lines.lock().push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_replays() {
        let recorder = RecordingSubscriber::new();
        recorder.added("wild", "0", &Document::new("0"));
        recorder.added("wild", "1", &Document::new("1"));
        recorder.ready();
        recorder.removed("wild", "0");
        recorder.changed("wild", "1", &Document::new("1"));

        assert_eq!(recorder.ready_count(), 1);
        assert_eq!(recorder.visible(), BTreeSet::from(["1".to_string()]));
        assert_eq!(recorder.events_with_collection()[0].0, "wild");
        assert_eq!(
            recorder.take_labels(),
            ["added 0", "added 1", "ready", "removed 0", "changed 1"]
        );
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn sink_filters_by_source() {
        let sink = RecordingSink::new();
        sink.emit(ReportLine::Surfaced {
            source: "a".into(),
            message: "boom".into(),
        });
        sink.emit(ReportLine::Surfaced {
            source: "b".into(),
            message: "bang".into(),
        });

        assert_eq!(sink.surfaced("a"), ["boom"]);
        assert!(sink.digests("a").is_empty());
        assert_eq!(sink.lines().len(), 2);
    }
}
