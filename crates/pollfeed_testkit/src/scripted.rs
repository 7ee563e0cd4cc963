//! A snapshot source that replays a fixed script of results.

use async_trait::async_trait;
use parking_lot::Mutex;
use pollfeed_engine::{FetchError, FetchResult, SnapshotSource, StoreError};
use pollfeed_protocol::{Document, Query};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One scripted fetch.
#[derive(Debug, Clone)]
struct Step {
    result: FetchResult<Vec<Document>>,
    delay: Duration,
}

/// Serves queued results in order, then repeats the last one forever.
///
/// With an empty script every fetch returns an empty snapshot.
#[derive(Default)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    fetches: AtomicU64,
}

impl ScriptedSource {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful snapshot.
    pub fn then_ok(self, documents: Vec<Document>) -> Self {
        self.then(Ok(documents), Duration::ZERO)
    }

    /// Queues a successful snapshot that takes `delay` to arrive.
    pub fn then_ok_after(self, documents: Vec<Document>, delay: Duration) -> Self {
        self.then(Ok(documents), delay)
    }

    /// Queues an "unavailable" failure for `url`.
    pub fn then_unavailable(self, url: &str) -> Self {
        self.then(
            Err(FetchError::Unavailable {
                url: url.to_string(),
            }),
            Duration::ZERO,
        )
    }

    /// Queues a transient read failure.
    pub fn then_transient(self, collection: &str, message: &str) -> Self {
        self.then(
            Err(StoreError::read(collection, message).into()),
            Duration::ZERO,
        )
    }

    fn then(self, result: FetchResult<Vec<Document>>, delay: Duration) -> Self {
        self.steps.lock().push_back(Step { result, delay });
        self
    }

    /// Number of fetches served so far.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
        .unwrap_or(Step {
            result: Ok(Vec::new()),
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self, _collection: &str, _query: &Query) -> FetchResult<Vec<Document>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step();
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.result
    }
}

/// Builds id-only documents.
pub fn docs(ids: &[&str]) -> Vec<Document> {
    ids.iter().map(|id| Document::new(*id)).collect()
}
