//! Snapshot polling and reconciliation.
//!
//! A [`ReconciliationEngine`] turns a stream of full snapshots into an
//! incremental add/change/remove/ready event stream. Each subscription runs
//! in its own task, owns its published id set, and has at most one fetch
//! outstanding at a time.
//!
//! ## Per-poll algorithm
//!
//! 1. Fetch a snapshot from the [`SnapshotSource`].
//! 2. On success, diff it against the published set, emit `added` or
//!    `changed` for every snapshot document and `removed` for every
//!    published id missing from it, then emit `ready` if not yet ready.
//! 3. On failure, report the error and keep the published set. If the store
//!    became unavailable, readiness is re-armed so `ready` fires again once
//!    snapshots resume.

use crate::config::PollConfig;
use crate::error::{FetchError, FetchResult};
use crate::report::ErrorAggregator;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use pollfeed_protocol::{diff, Document, FeedEvent, PublishedSet, Query};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

/// Produces full snapshots of a collection.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetches every document of `collection` matching `query`.
    async fn fetch(&self, collection: &str, query: &Query) -> FetchResult<Vec<Document>>;
}

/// Receives the incremental event stream of one subscription.
///
/// Callbacks run on the subscription task and should not block.
pub trait Subscriber: Send + Sync + 'static {
    /// A document became visible.
    fn added(&self, collection: &str, id: &str, doc: &Document);

    /// A visible document was seen again.
    fn changed(&self, collection: &str, id: &str, doc: &Document);

    /// A visible document disappeared.
    fn removed(&self, collection: &str, id: &str);

    /// The initial view is complete, or snapshots resumed after an outage.
    fn ready(&self);
}

/// Counters for one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Fetches issued.
    pub polls: u64,
    /// Snapshots reconciled.
    pub snapshots: u64,
    /// Fetches that failed.
    pub failures: u64,
    /// Fetches that settled after the subscription stopped.
    pub discarded: u64,
    /// `added` events emitted.
    pub added: u64,
    /// `changed` events emitted.
    pub changed: u64,
    /// `removed` events emitted.
    pub removed: u64,
    /// `ready` events emitted.
    pub ready: u64,
}

/// Runs polled subscriptions against a snapshot source.
pub struct ReconciliationEngine<S: SnapshotSource> {
    source: Arc<S>,
    aggregator: ErrorAggregator,
}

impl<S: SnapshotSource> ReconciliationEngine<S> {
    /// Creates an engine reading from `source` and reporting to `aggregator`.
    pub fn new(source: Arc<S>, aggregator: ErrorAggregator) -> Self {
        Self { source, aggregator }
    }

    /// Returns the snapshot source.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Returns the error aggregator.
    pub fn aggregator(&self) -> &ErrorAggregator {
        &self.aggregator
    }

    /// Starts polling `config.collection` for `subscriber`.
    ///
    /// The first poll fires immediately, then one per `config.interval`.
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>, config: PollConfig) -> Subscription {
        let id = Uuid::new_v4();
        let state = Arc::new(SubscriptionState::default());
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            subscription = %id,
            collection = %config.collection,
            interval_ms = config.interval.as_millis() as u64,
            "subscription started"
        );

        let poller = Poller {
            id,
            source: Arc::clone(&self.source),
            aggregator: self.aggregator.clone(),
            subscriber,
            state: Arc::clone(&state),
            config: config.clone(),
        };
        let task = tokio::spawn(poller.run(stop_rx));

        Subscription {
            id,
            collection: config.collection,
            state,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }
}

#[derive(Default)]
struct SubscriptionState {
    published: RwLock<PublishedSet>,
    ready: AtomicBool,
    stopped: AtomicBool,
    stats: Mutex<SubscriptionStats>,
}

impl SubscriptionState {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Handle to a running subscription. Dropping it stops the subscription.
pub struct Subscription {
    id: Uuid,
    collection: String,
    state: Arc<SubscriptionState>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Returns the subscription id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the polled collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Stops polling. A fetch still in flight is discarded when it settles.
    pub fn stop(&self) {
        if !self.state.stopped.swap(true, Ordering::SeqCst) {
            debug!(subscription = %self.id, "subscription stopping");
        }
        self.stop_tx.send_replace(true);
    }

    /// Returns true once [`Subscription::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Returns the ids currently published to the subscriber.
    pub fn published(&self) -> BTreeSet<String> {
        self.state.published.read().to_ids()
    }

    /// Returns true if `ready` has fired and has not been re-armed.
    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::SeqCst)
    }

    /// Returns a copy of the subscription counters.
    pub fn stats(&self) -> SubscriptionStats {
        *self.state.stats.lock()
    }

    /// Waits for the polling task to finish. Returns at once if already joined.
    ///
    /// The task only finishes after [`Subscription::stop`].
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Poller<S: SnapshotSource> {
    id: Uuid,
    source: Arc<S>,
    aggregator: ErrorAggregator,
    subscriber: Arc<dyn Subscriber>,
    state: Arc<SubscriptionState>,
    config: PollConfig,
}

impl<S: SnapshotSource> Poller<S> {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        // tokio rejects a zero period.
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                _ = ticker.tick() => {}
            }
            if self.state.is_stopped() {
                break;
            }

            self.state.stats.lock().polls += 1;
            debug!(subscription = %self.id, collection = %self.config.collection, "polling");
            let result = self
                .source
                .fetch(&self.config.collection, &self.config.query)
                .await;

            if self.state.is_stopped() {
                self.state.stats.lock().discarded += 1;
                debug!(subscription = %self.id, "discarding fetch settled after stop");
                break;
            }

            match result {
                Ok(documents) => self.reconcile(documents),
                Err(error) => self.fail(error),
            }
        }

        info!(subscription = %self.id, collection = %self.config.collection, "subscription stopped");
    }

    fn reconcile(&self, documents: Vec<Document>) {
        let delta = {
            let mut published = self.state.published.write();
            let delta = diff(&published, documents);
            published.apply(&delta);
            delta
        };

        let collection = self.config.collection.as_str();
        let mut stats = SubscriptionStats::default();
        for event in delta.into_events() {
            match event {
                FeedEvent::Added { id, doc } => {
                    stats.added += 1;
                    self.subscriber.added(collection, &id, &doc);
                }
                FeedEvent::Changed { id, doc } => {
                    stats.changed += 1;
                    self.subscriber.changed(collection, &id, &doc);
                }
                FeedEvent::Removed { id } => {
                    stats.removed += 1;
                    self.subscriber.removed(collection, &id);
                }
                FeedEvent::Ready => {}
            }
        }

        if !self.state.ready.swap(true, Ordering::SeqCst) {
            stats.ready += 1;
            debug!(subscription = %self.id, "ready");
            self.subscriber.ready();
        }

        let mut total = self.state.stats.lock();
        total.snapshots += 1;
        total.added += stats.added;
        total.changed += stats.changed;
        total.removed += stats.removed;
        total.ready += stats.ready;
    }

    fn fail(&self, error: FetchError) {
        self.state.stats.lock().failures += 1;
        if error.is_unavailable() && self.state.ready.swap(false, Ordering::SeqCst) {
            debug!(subscription = %self.id, "store unavailable, readiness re-armed");
        }
        self.aggregator.handle_error(&error, &self.config.source);
    }
}

async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the handle is gone, which also stops the task.
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregatorConfig;
    use crate::error::StoreError;
    use crate::report::{ReportLine, ReportSink};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl Events {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl Subscriber for Events {
        fn added(&self, _: &str, id: &str, _: &Document) {
            self.0.lock().push(format!("added {id}"));
        }
        fn changed(&self, _: &str, id: &str, _: &Document) {
            self.0.lock().push(format!("changed {id}"));
        }
        fn removed(&self, _: &str, id: &str) {
            self.0.lock().push(format!("removed {id}"));
        }
        fn ready(&self) {
            self.0.lock().push("ready".into());
        }
    }

    #[derive(Default)]
    struct Lines(Mutex<Vec<ReportLine>>);

    impl ReportSink for Lines {
        fn emit(&self, line: ReportLine) {
            self.0.lock().push(line);
        }
    }

    /// Serves queued results in order, then keeps serving the last one.
    struct Script {
        results: Mutex<VecDeque<FetchResult<Vec<Document>>>>,
        delay: Duration,
    }

    impl Script {
        fn new(results: Vec<FetchResult<Vec<Document>>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for Script {
        async fn fetch(&self, _: &str, _: &Query) -> FetchResult<Vec<Document>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut results = self.results.lock();
            if results.len() > 1 {
                results.pop_front().unwrap_or(Ok(Vec::new()))
            } else {
                results.front().cloned().unwrap_or(Ok(Vec::new()))
            }
        }
    }

    fn docs(ids: &[&str]) -> Vec<Document> {
        ids.iter().map(|id| Document::new(*id)).collect()
    }

    fn unavailable() -> FetchError {
        FetchError::Unavailable {
            url: "mongodb://localhost:27017".into(),
        }
    }

    fn engine(script: Script) -> (ReconciliationEngine<Script>, Arc<Lines>) {
        let lines = Arc::new(Lines::default());
        let aggregator = ErrorAggregator::with_sink(AggregatorConfig::default(), lines.clone());
        (ReconciliationEngine::new(Arc::new(script), aggregator), lines)
    }

    fn config() -> PollConfig {
        PollConfig::new("wild").with_interval(Duration::from_millis(1000))
    }

    /// Lets the subscription task run to its next timer.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_is_immediate_and_emits_ready() {
        let (engine, _) = engine(Script::new(vec![Ok(docs(&["0", "1"]))]));
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());

        settle().await;
        assert_eq!(events.take(), ["added 0", "added 1", "ready"]);
        assert!(sub.is_ready());
        assert_eq!(sub.published().len(), 2);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(events.take(), ["changed 0", "changed 1"]);
        assert_eq!(sub.stats().polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rotating_snapshots_emit_removals() {
        let (engine, _) = engine(Script::new(vec![
            Ok(docs(&["0", "1", "2", "3"])),
            Ok(docs(&["1", "2", "3", "4"])),
        ]));
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());

        settle().await;
        events.take();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;

        assert_eq!(
            events.take(),
            ["changed 1", "changed 2", "changed 3", "added 4", "removed 0"]
        );
        let expected: BTreeSet<String> = ["1", "2", "3", "4"].map(String::from).into();
        assert_eq!(sub.published(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_first_snapshot_is_ready() {
        let (engine, _) = engine(Script::new(vec![Ok(Vec::new())]));
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());

        settle().await;
        assert_eq!(events.take(), ["ready"]);
        assert!(sub.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_rearms_ready_without_removals() {
        let (engine, lines) = engine(Script::new(vec![
            Ok(docs(&["0"])),
            Err(unavailable()),
            Ok(docs(&["0"])),
        ]));
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());

        settle().await;
        assert_eq!(events.take(), ["added 0", "ready"]);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert!(events.take().is_empty());
        assert!(!sub.is_ready());
        assert_eq!(sub.published().len(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(events.take(), ["changed 0", "ready"]);
        assert!(sub.is_ready());

        assert_eq!(
            lines.0.lock().as_slice(),
            [ReportLine::Surfaced {
                source: "poll:wild".into(),
                message: "Server at mongodb://localhost:27017 unavailable".into(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_keeps_readiness() {
        let (engine, lines) = engine(Script::new(vec![
            Ok(docs(&["0"])),
            Err(StoreError::read("wild", "cursor killed").into()),
            Ok(docs(&["0"])),
        ]));
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());

        settle().await;
        events.take();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert!(sub.is_ready());
        assert_eq!(sub.stats().failures, 1);
        assert_eq!(lines.0.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(events.take(), ["changed 0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_fetch() {
        let mut script = Script::new(vec![Ok(docs(&["0"]))]);
        script.delay = Duration::from_millis(500);
        let (engine, _) = engine(script);
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());

        settle().await;
        sub.stop();
        assert!(sub.is_stopped());
        sub.join().await;

        assert!(events.take().is_empty());
        assert!(sub.published().is_empty());
        assert_eq!(sub.stats().discarded, 1);
        assert_eq!(sub.stats().snapshots, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetches_never_overlap() {
        let mut script = Script::new(vec![Ok(docs(&["0"]))]);
        script.delay = Duration::from_millis(2500);
        let (engine, _) = engine(script);
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());

        tokio::time::sleep(Duration::from_millis(5100)).await;
        settle().await;
        // Fetches settle at 2.5s and 5.0s; missed ticks do not queue up.
        assert_eq!(sub.stats().polls, 3);
        assert_eq!(sub.stats().snapshots, 2);

        sub.stop();
        sub.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_polling() {
        let source = Arc::new(Script::new(vec![Ok(docs(&["0"]))]));
        let engine = ReconciliationEngine::new(
            source,
            ErrorAggregator::new(AggregatorConfig::default()),
        );
        let events = Arc::new(Events::default());
        let sub = engine.subscribe(events.clone(), config());
        settle().await;
        drop(sub);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(events.take(), ["added 0", "ready"]);
    }
}
