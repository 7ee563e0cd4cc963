//! Configuration for the client, the poll loop and the error aggregator.

use pollfeed_protocol::Query;
use std::time::Duration;

/// Port of the database embedded in a local development server.
pub const EMBEDDED_PORT: u16 = 3001;

/// Default port of a standalone database server.
pub const EXTERNAL_PORT: u16 = 27017;

/// Configuration for reconnect backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt.
    pub min_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Creates a backoff configuration.
    ///
    /// A `max_delay` below `min_delay` is raised to `min_delay`.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// Calculates the delay after a given number of consecutive failures
    /// (0-indexed: the first failure waits `min_delay`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(102_400))
    }
}

/// Configuration for a [`ResilientClient`](crate::ResilientClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store host name.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Database name.
    pub db_name: String,
    /// Source name used when reporting connection errors.
    pub source: String,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(host: impl Into<String>, port: u16, db_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            db_name: db_name.into(),
            source: "ResilientClient".into(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Configuration for the database embedded in a local development server.
    pub fn embedded() -> Self {
        Self::new("localhost", EMBEDDED_PORT, "meteor")
    }

    /// Configuration for a standalone server on localhost.
    pub fn external(db_name: impl Into<String>) -> Self {
        Self::new("localhost", EXTERNAL_PORT, db_name)
    }

    /// Sets the error source name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the connection URL.
    pub fn url(&self) -> String {
        format!("mongodb://{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::embedded()
    }
}

/// Configuration for one polled subscription.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Collection to read and publish.
    pub collection: String,
    /// Query passed to the store.
    pub query: Query,
    /// Time between polls.
    pub interval: Duration,
    /// Source name used when reporting fetch errors.
    pub source: String,
}

impl PollConfig {
    /// Creates a poll configuration that reads the whole collection every second.
    pub fn new(collection: impl Into<String>) -> Self {
        let collection = collection.into();
        Self {
            source: format!("poll:{collection}"),
            collection,
            query: Query::all(),
            interval: Duration::from_millis(1000),
        }
    }

    /// Sets the query.
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Sets the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the error source name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Configuration for an [`ErrorAggregator`](crate::ErrorAggregator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Length of one batch window.
    pub window: Duration,
}

impl AggregatorConfig {
    /// Creates an aggregator configuration.
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(60_000))
    }
}
