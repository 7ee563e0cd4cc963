//! External store abstraction.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use pollfeed_protocol::{Document, Query};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Opens connections to an external document store.
///
/// This trait abstracts the driver, allowing different implementations
/// (a database driver, a REST source, an in-memory store for testing).
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Connection type produced by [`StoreConnector::connect`].
    type Connection: StoreConnection;

    /// Returns the URL used in log and error messages.
    fn url(&self) -> String;

    /// Attempts to open a connection.
    async fn connect(&self) -> StoreResult<Self::Connection>;
}

/// An open connection to an external document store.
#[async_trait]
pub trait StoreConnection: Send + Sync + 'static {
    /// Reads every document matching `query`.
    ///
    /// The store's cursor is drained into memory before this resolves.
    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// Resolves once the connection has been closed by the store.
    async fn closed(&self);

    /// Closes the connection deliberately.
    async fn close(&self);
}

/// Returns true if `doc` matches a top-level equality filter.
///
/// An empty object or `null` matches everything. Filters that are not
/// objects match nothing.
pub fn matches_filter(doc: &Document, filter: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(conditions) => conditions.iter().all(|(field, expected)| {
            if field == "_id" {
                expected.as_str() == Some(doc.id.as_str())
            } else {
                doc.get(field) == Some(expected)
            }
        }),
        _ => false,
    }
}

struct MemoryInner {
    url: String,
    online: AtomicBool,
    collections: RwLock<HashMap<String, Vec<Document>>>,
    read_failure: RwLock<Option<String>>,
    read_delay: RwLock<Duration>,
    /// Bumped whenever live connections are dropped.
    epoch: watch::Sender<u64>,
    connect_attempts: AtomicU64,
    reads: AtomicU64,
}

/// An in-memory store for testing and demos.
///
/// Availability, read failures and read latency can be controlled while
/// connections are open. Clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Creates an empty, online store.
    pub fn new(url: impl Into<String>) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                url: url.into(),
                online: AtomicBool::new(true),
                collections: RwLock::new(HashMap::new()),
                read_failure: RwLock::new(None),
                read_delay: RwLock::new(Duration::ZERO),
                epoch,
                connect_attempts: AtomicU64::new(0),
                reads: AtomicU64::new(0),
            }),
        }
    }

    /// Replaces the contents of a collection.
    pub fn set_documents(&self, collection: &str, documents: Vec<Document>) {
        self.inner
            .collections
            .write()
            .insert(collection.to_string(), documents);
    }

    /// Appends a document to a collection.
    pub fn insert(&self, collection: &str, document: Document) {
        self.inner
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// Removes a document from a collection. Returns true if it existed.
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let mut collections = self.inner.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return false;
        };
        let before = documents.len();
        documents.retain(|doc| doc.id != id);
        documents.len() != before
    }

    /// Brings the store up or down. Going down drops every open connection.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online && !online {
            self.drop_connections();
        }
    }

    /// Returns true if the store accepts connections.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Closes every open connection from the store side.
    pub fn drop_connections(&self) {
        self.inner.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Makes reads fail with `message` until cleared with `None`.
    pub fn fail_reads(&self, message: Option<&str>) {
        *self.inner.read_failure.write() = message.map(str::to_string);
    }

    /// Delays every read by `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.inner.read_delay.write() = delay;
    }

    /// Number of connection attempts so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of reads issued so far.
    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://localhost")
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    type Connection = MemoryConnection;

    fn url(&self) -> String {
        self.inner.url.clone()
    }

    async fn connect(&self) -> StoreResult<MemoryConnection> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_online() {
            return Err(StoreError::connect(&self.inner.url, "connect ECONNREFUSED"));
        }

        let epoch = self.inner.epoch.subscribe();
        let opened_at = *epoch.borrow();
        Ok(MemoryConnection {
            inner: Arc::clone(&self.inner),
            epoch,
            opened_at,
            closed: AtomicBool::new(false),
        })
    }
}

/// A connection to a [`MemoryStore`].
pub struct MemoryConnection {
    inner: Arc<MemoryInner>,
    epoch: watch::Receiver<u64>,
    opened_at: u64,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && *self.epoch.borrow() == self.opened_at
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.read_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.is_open() {
            return Err(StoreError::Closed);
        }
        if let Some(message) = self.inner.read_failure.read().clone() {
            return Err(StoreError::read(collection, message));
        }

        let collections = self.inner.collections.read();
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|doc| matches_filter(doc, &query.filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn closed(&self) {
        let mut epoch = self.epoch.clone();
        while *epoch.borrow_and_update() == self.opened_at {
            if epoch.changed().await.is_err() {
                return;
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
