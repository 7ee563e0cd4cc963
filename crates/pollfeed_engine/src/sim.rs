//! A simulated remote source whose contents change on every read.
//!
//! [`RotatingStore`] holds ten documents `"0"` to `"9"`. Each read returns
//! the first four and then rotates the list by one, so consecutive reads
//! overlap by three documents. Reads can be made slow and unreliable to
//! exercise the reconciliation and error batching paths.

use crate::error::{StoreError, StoreResult};
use crate::store::{StoreConnection, StoreConnector};
use async_trait::async_trait;
use parking_lot::Mutex;
use pollfeed_protocol::{Document, Query};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Message of a randomly lost read.
pub const DATA_LOST_MESSAGE: &str = "Data randomly lost.\n\
    See RFC 748: TELNET RANDOMLY-LOSE Option\n\
    https://tools.ietf.org/html/rfc748\n";

/// Default probability that a read is lost.
pub const DEFAULT_LOSS_RATE: f64 = 0.01;

const DOCUMENT_COUNT: usize = 10;
const WINDOW: usize = 4;
const MIN_LATENCY_MS: u64 = 100;
const MAX_LATENCY_MS: u64 = 1000;

struct RotatingInner {
    documents: Mutex<VecDeque<Document>>,
    loss_rate: f64,
    latency: bool,
    rng: Mutex<StdRng>,
    reads: AtomicU64,
}

/// The rotating "wild" source.
#[derive(Clone)]
pub struct RotatingStore {
    inner: Arc<RotatingInner>,
}

impl RotatingStore {
    /// Creates a store with the default loss rate and simulated latency.
    pub fn new() -> Self {
        Self::build(DEFAULT_LOSS_RATE, true, StdRng::from_entropy())
    }

    /// Creates a reproducible store from a seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::build(DEFAULT_LOSS_RATE, true, StdRng::seed_from_u64(seed))
    }

    fn build(loss_rate: f64, latency: bool, rng: StdRng) -> Self {
        let documents = (0..DOCUMENT_COUNT)
            .map(|i| Document::new(i.to_string()))
            .collect();
        Self {
            inner: Arc::new(RotatingInner {
                documents: Mutex::new(documents),
                loss_rate: clamp_loss_rate(loss_rate),
                latency,
                rng: Mutex::new(rng),
                reads: AtomicU64::new(0),
            }),
        }
    }

    /// Sets the probability that a read is lost, clamped to `0.0..=1.0`.
    ///
    /// NaN falls back to [`DEFAULT_LOSS_RATE`].
    pub fn with_loss_rate(self, loss_rate: f64) -> Self {
        let latency = self.inner.latency;
        self.rebuild(loss_rate, latency)
    }

    /// Enables or disables the random 100 to 1000ms read latency.
    pub fn with_latency(self, latency: bool) -> Self {
        let loss_rate = self.inner.loss_rate;
        self.rebuild(loss_rate, latency)
    }

    fn rebuild(self, loss_rate: f64, latency: bool) -> Self {
        let rng = self.inner.rng.lock().clone();
        let documents = self.inner.documents.lock().clone();
        let store = Self::build(loss_rate, latency, rng);
        *store.inner.documents.lock() = documents;
        store
    }

    /// Returns the loss rate.
    pub fn loss_rate(&self) -> f64 {
        self.inner.loss_rate
    }

    /// Number of reads served or lost so far.
    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Takes the current window and rotates, then rolls for latency and loss.
    fn next_read(&self) -> (Vec<Document>, Option<Duration>, bool) {
        let window = {
            let mut documents = self.inner.documents.lock();
            let window: Vec<Document> = documents.iter().take(WINDOW).cloned().collect();
            documents.rotate_left(1);
            window
        };

        let mut rng = self.inner.rng.lock();
        let delay = self
            .inner
            .latency
            .then(|| Duration::from_millis(rng.gen_range(MIN_LATENCY_MS..=MAX_LATENCY_MS)));
        let lost = rng.gen_bool(self.inner.loss_rate);
        (window, delay, lost)
    }
}

fn clamp_loss_rate(loss_rate: f64) -> f64 {
    if loss_rate.is_nan() {
        DEFAULT_LOSS_RATE
    } else {
        loss_rate.clamp(0.0, 1.0)
    }
}

impl Default for RotatingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for RotatingStore {
    type Connection = RotatingStore;

    fn url(&self) -> String {
        "faux://wild".to_string()
    }

    async fn connect(&self) -> StoreResult<RotatingStore> {
        Ok(self.clone())
    }
}

#[async_trait]
impl StoreConnection for RotatingStore {
    async fn find(&self, collection: &str, _query: &Query) -> StoreResult<Vec<Document>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let (documents, delay, lost) = self.next_read();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lost {
            return Err(StoreError::read(collection, DATA_LOST_MESSAGE));
        }
        Ok(documents)
    }

    async fn closed(&self) {
        std::future::pending::<()>().await
    }

    async fn close(&self) {}
}
