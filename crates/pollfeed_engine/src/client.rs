//! Self-healing store client with a last-known-good cache.
//!
//! A [`ResilientClient`] keeps one logical connection to an external store.
//! A supervisor task connects, waits for the connection to close, and
//! reconnects with exponential backoff for as long as the client runs.
//!
//! Every successful read is cached per (collection, filter, options). While
//! disconnected, fetches are answered from that cache with a stale marker
//! document prepended, or fail as unavailable when nothing is cached.

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::engine::SnapshotSource;
use crate::error::{FetchError, FetchResult};
use crate::report::ErrorAggregator;
use crate::store::{StoreConnection, StoreConnector};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use pollfeed_protocol::{Document, Query, QueryKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state of a [`ResilientClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// A connection is open.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Counters for a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Connection attempts made.
    pub connect_attempts: u64,
    /// Connections opened.
    pub connections: u64,
    /// Connections closed by the store.
    pub disconnects: u64,
    /// Live reads that succeeded.
    pub live_reads: u64,
    /// Live reads that failed.
    pub read_failures: u64,
    /// Fetches answered from the cache.
    pub cache_hits: u64,
    /// Fetches that failed as unavailable.
    pub unavailable: u64,
}

struct Shared<C: StoreConnector> {
    url: String,
    state: watch::Sender<ConnectionState>,
    connection: RwLock<Option<Arc<C::Connection>>>,
    cache: RwLock<HashMap<QueryKey, Vec<Document>>>,
    retry_delay: Mutex<Duration>,
    stats: Mutex<ClientStats>,
}

impl<C: StoreConnector> Shared<C> {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

/// A store client that reconnects on its own and serves cached results
/// while the store is unreachable.
pub struct ResilientClient<C: StoreConnector> {
    shared: Arc<Shared<C>>,
    config: ClientConfig,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: StoreConnector> ResilientClient<C> {
    /// Starts a client and its connection supervisor.
    ///
    /// The first connection attempt is made immediately. Must be called
    /// from within a tokio runtime.
    pub fn start(connector: C, config: ClientConfig, aggregator: ErrorAggregator) -> Arc<Self> {
        let url = connector.url();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            url: url.clone(),
            state,
            connection: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
            retry_delay: Mutex::new(config.backoff.min_delay),
            stats: Mutex::new(ClientStats::default()),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(url = %url, db = %config.db_name, "client starting");

        let supervisor = Supervisor {
            connector,
            shared: Arc::clone(&shared),
            backoff: Backoff::new(config.backoff.clone()),
            aggregator,
            source: config.source.clone(),
        };
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        Arc::new(Self {
            shared,
            config,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the store URL.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Returns the connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns true if a connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Waits until the client reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Returns the delay the next failed connection attempt will wait.
    pub fn retry_delay(&self) -> Duration {
        *self.shared.retry_delay.lock()
    }

    /// Returns a copy of the client counters.
    pub fn stats(&self) -> ClientStats {
        *self.shared.stats.lock()
    }

    /// Fetches every document of `collection` matching `query`.
    ///
    /// While connected this reads from the store and refreshes the cache.
    /// While disconnected it returns the cached result, stale marker first,
    /// without touching the network. A read that fails because the
    /// connection went away is answered the same way.
    pub async fn fetch(&self, collection: &str, query: &Query) -> FetchResult<Vec<Document>> {
        let key = query.key(collection);
        let connection = self.shared.connection.read().clone();

        let Some(connection) = connection else {
            return self.fetch_cached(collection, key);
        };

        match connection.find(collection, query).await {
            Ok(documents) => {
                let mut entry = Vec::with_capacity(documents.len() + 1);
                entry.push(Document::stale_marker());
                entry.extend(documents.iter().cloned());
                self.shared.cache.write().insert(key, entry);
                self.shared.stats.lock().live_reads += 1;
                Ok(documents)
            }
            Err(error) if error.is_retryable() => {
                self.shared.stats.lock().read_failures += 1;
                debug!(collection, error = %error, "connection lost during read");
                self.fetch_cached(collection, key)
            }
            Err(error) => {
                self.shared.stats.lock().read_failures += 1;
                debug!(collection, error = %error, "live read failed");
                Err(FetchError::Transient(error))
            }
        }
    }

    /// Returns the cache entry for a query, stale marker included.
    pub fn cached(&self, collection: &str, query: &Query) -> Option<Vec<Document>> {
        self.shared.cache.read().get(&query.key(collection)).cloned()
    }

    fn fetch_cached(&self, collection: &str, key: QueryKey) -> FetchResult<Vec<Document>> {
        let cached = self.shared.cache.read().get(&key).cloned();
        match cached {
            Some(documents) => {
                self.shared.stats.lock().cache_hits += 1;
                debug!(collection, key = %key, "serving cached snapshot");
                Ok(documents)
            }
            None => {
                self.shared.stats.lock().unavailable += 1;
                Err(FetchError::Unavailable {
                    url: self.shared.url.clone(),
                })
            }
        }
    }

    /// Closes the connection and stops reconnecting.
    ///
    /// Cached results remain available. Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            info!(url = %self.shared.url, "client shut down");
        }
    }
}

#[async_trait]
impl<C: StoreConnector> SnapshotSource for ResilientClient<C> {
    async fn fetch(&self, collection: &str, query: &Query) -> FetchResult<Vec<Document>> {
        ResilientClient::fetch(self, collection, query).await
    }
}

impl<C: StoreConnector> Drop for ResilientClient<C> {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

struct Supervisor<C: StoreConnector> {
    connector: C,
    shared: Arc<Shared<C>>,
    backoff: Backoff,
    aggregator: ErrorAggregator,
    source: String,
}

impl<C: StoreConnector> Supervisor<C> {
    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            self.shared.set_state(ConnectionState::Connecting);
            self.shared.stats.lock().connect_attempts += 1;
            debug!(url = %self.shared.url, "connecting");

            let attempt = tokio::select! {
                biased;
                _ = stopped(&mut shutdown_rx) => break,
                result = self.connector.connect() => result,
            };

            match attempt {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    self.backoff.reset();
                    *self.shared.retry_delay.lock() = self.backoff.current();
                    *self.shared.connection.write() = Some(Arc::clone(&connection));
                    self.shared.stats.lock().connections += 1;
                    self.shared.set_state(ConnectionState::Connected);
                    info!(url = %self.shared.url, "connected");

                    let closed_by_store = tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown_rx) => false,
                        _ = connection.closed() => true,
                    };

                    self.shared.connection.write().take();
                    self.shared.set_state(ConnectionState::Disconnected);
                    if !closed_by_store {
                        connection.close().await;
                        break;
                    }
                    self.shared.stats.lock().disconnects += 1;
                    info!(url = %self.shared.url, "connection closed, reconnecting");
                }
                Err(error) => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    if self.backoff.is_at_min() || self.backoff.is_at_cap() {
                        self.aggregator.handle_error(&error, &self.source);
                    }
                    if self.backoff.is_at_cap() {
                        warn!(url = %self.shared.url, "Attempting to connect to {}", self.shared.url);
                    }

                    let delay = self.backoff.next_delay();
                    *self.shared.retry_delay.lock() = self.backoff.current();
                    debug!(
                        url = %self.shared.url,
                        delay_ms = delay.as_millis() as u64,
                        "connection failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown_rx) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
    }
}

async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
