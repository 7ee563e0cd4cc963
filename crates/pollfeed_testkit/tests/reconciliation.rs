//! Scenario tests for snapshot reconciliation.

use pollfeed_engine::{AggregatorConfig, ErrorAggregator, PollConfig, ReconciliationEngine};
use pollfeed_protocol::FeedEvent;
use pollfeed_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const INTERVAL: Duration = Duration::from_millis(1000);

fn engine(source: ScriptedSource) -> (ReconciliationEngine<ScriptedSource>, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let aggregator = ErrorAggregator::with_sink(AggregatorConfig::default(), sink.clone());
    (ReconciliationEngine::new(Arc::new(source), aggregator), sink)
}

fn config() -> PollConfig {
    PollConfig::new("wild").with_interval(INTERVAL)
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Advances paused time by `millis` and lets spawned tasks run.
async fn advance(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_rotation_emits_remove_changes_and_add() {
    let (engine, _) = engine(
        ScriptedSource::new()
            .then_ok(docs(&["0", "1", "2", "3"]))
            .then_ok(docs(&["1", "2", "3", "4"])),
    );
    let recorder = RecordingSubscriber::new();
    let sub = engine.subscribe(recorder.clone(), config());

    advance(0).await;
    assert_eq!(
        recorder.take_labels(),
        ["added 0", "added 1", "added 2", "added 3", "ready"]
    );

    advance(1000).await;
    let labels: BTreeSet<String> = recorder.take_labels().into_iter().collect();
    let expected: BTreeSet<String> = ["removed 0", "changed 1", "changed 2", "changed 3", "added 4"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(labels, expected);
    assert_eq!(sub.published(), set(&["1", "2", "3", "4"]));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_snapshot_changes_every_id_each_poll() {
    let (engine, _) = engine(ScriptedSource::new().then_ok(docs(&["a", "b"])));
    let recorder = RecordingSubscriber::new();
    let sub = engine.subscribe(recorder.clone(), config());

    advance(0).await;
    recorder.take();
    for _ in 0..3 {
        advance(1000).await;
        assert_eq!(recorder.take_labels(), ["changed a", "changed b"]);
    }
    assert_eq!(sub.stats().ready, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_snapshot_removes_everything() {
    let (engine, _) = engine(
        ScriptedSource::new()
            .then_ok(docs(&["0", "1"]))
            .then_ok(Vec::new()),
    );
    let recorder = RecordingSubscriber::new();
    let sub = engine.subscribe(recorder.clone(), config());

    advance(0).await;
    recorder.take();
    advance(1000).await;
    assert_eq!(recorder.take_labels(), ["removed 0", "removed 1"]);
    assert!(sub.published().is_empty());
    assert!(sub.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_outage_flickers_readiness_without_removals() {
    let (engine, sink) = engine(
        ScriptedSource::new()
            .then_ok(docs(&["0", "1"]))
            .then_unavailable("mongodb://localhost:3001")
            .then_unavailable("mongodb://localhost:3001")
            .then_ok(docs(&["1", "2"])),
    );
    let recorder = RecordingSubscriber::new();
    let sub = engine.subscribe(recorder.clone(), config());

    advance(0).await;
    recorder.take();

    advance(2000).await;
    assert!(recorder.take().is_empty());
    assert!(!sub.is_ready());
    assert_eq!(sub.published(), set(&["0", "1"]));

    advance(1000).await;
    assert_eq!(
        recorder.take_labels(),
        ["changed 1", "added 2", "removed 0", "ready"]
    );
    assert_eq!(sub.stats().ready, 2);

    // Two identical failures, one surfaced line.
    assert_eq!(
        sink.surfaced("poll:wild"),
        ["Server at mongodb://localhost:3001 unavailable"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_keeps_state() {
    let (engine, sink) = engine(
        ScriptedSource::new()
            .then_ok(docs(&["0"]))
            .then_transient("wild", "Data randomly lost.")
            .then_ok(docs(&["0"])),
    );
    let recorder = RecordingSubscriber::new();
    let sub = engine.subscribe(recorder.clone(), config());

    advance(0).await;
    recorder.take();
    advance(1000).await;
    assert!(recorder.take().is_empty());
    assert!(sub.is_ready());
    assert_eq!(sub.published(), set(&["0"]));
    assert_eq!(
        sink.surfaced("poll:wild"),
        ["read from wild failed: Data randomly lost."]
    );

    advance(1000).await;
    assert_eq!(recorder.take_labels(), ["changed 0"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_in_flight_fetch() {
    let source = ScriptedSource::new().then_ok_after(docs(&["0"]), Duration::from_millis(400));
    let (engine, _) = engine(source);
    let recorder = RecordingSubscriber::new();
    let sub = engine.subscribe(recorder.clone(), config());

    advance(100).await;
    sub.stop();
    advance(1000).await;
    sub.join().await;

    assert!(recorder.events().is_empty());
    assert_eq!(engine.source().fetches(), 1);
    assert_eq!(sub.stats().discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_independent_subscriptions() {
    let (engine, _) = engine(ScriptedSource::new().then_ok(docs(&["0"])));
    let first = RecordingSubscriber::new();
    let second = RecordingSubscriber::new();
    let sub_a = engine.subscribe(first.clone(), config());
    let sub_b = engine.subscribe(second.clone(), PollConfig::new("tame").with_interval(INTERVAL));

    advance(0).await;
    sub_a.stop();
    advance(2000).await;

    assert_eq!(first.take_labels(), ["added 0", "ready"]);
    assert_eq!(second.events().len(), 4);
    assert!(second
        .events_with_collection()
        .iter()
        .all(|(collection, event)| collection == "tame" || *event == FeedEvent::Ready));
    assert!(!sub_b.is_stopped());
}

fn replay_through_engine(snapshots: Vec<Vec<pollfeed_protocol::Document>>) -> (BTreeSet<String>, BTreeSet<String>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async move {
        let expected: BTreeSet<String> = snapshots
            .last()
            .map(|docs| docs.iter().map(|d| d.id.clone()).collect())
            .unwrap_or_default();
        let polls = snapshots.len() as u64;
        let source = snapshots
            .into_iter()
            .fold(ScriptedSource::new(), |source, docs| source.then_ok(docs));

        let (engine, _) = engine(source);
        let recorder = RecordingSubscriber::new();
        let sub = engine.subscribe(recorder.clone(), config());
        advance((polls - 1) * 1000 + 500).await;
        sub.stop();
        sub.join().await;

        assert_eq!(sub.published(), expected);
        (recorder.visible(), expected)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_replay_matches_latest_snapshot(snapshots in snapshot_sequence_strategy()) {
        let (visible, expected) = replay_through_engine(snapshots);
        prop_assert_eq!(visible, expected);
    }
}
