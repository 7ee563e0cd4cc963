//! # pollfeed Engine
//!
//! Resilient polling and reconciliation for external document stores.
//!
//! This crate provides:
//! - `ResilientClient`: one self-healing store connection with exponential
//!   reconnect backoff and a last-known-good cache per query
//! - `ReconciliationEngine`: per-subscription poll loops that turn full
//!   snapshots into an add/change/remove/ready event stream
//! - `ErrorAggregator`: per-source batching of repeated error messages
//! - `MemoryStore` and `RotatingStore`: in-process stores for tests and demos
//!
//! ## Example
//!
//! ```rust,ignore
//! use pollfeed_engine::{
//!     AggregatorConfig, ClientConfig, ErrorAggregator, PollConfig,
//!     ReconciliationEngine, ResilientClient, RotatingStore,
//! };
//!
//! let aggregator = ErrorAggregator::new(AggregatorConfig::default());
//! let client = ResilientClient::start(RotatingStore::new(), ClientConfig::default(), aggregator.clone());
//! let engine = ReconciliationEngine::new(client, aggregator);
//! let subscription = engine.subscribe(subscriber, PollConfig::new("wild"));
//! ```
//!
//! ## Failure handling
//!
//! No failure reaches a subscriber. Connection errors are retried forever,
//! fetch errors are reported through the aggregator and the next poll tries
//! again.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod backoff;
mod client;
mod config;
mod engine;
mod error;
mod report;
mod sim;
mod store;

pub use backoff::Backoff;
pub use client::{ClientStats, ConnectionState, ResilientClient};
pub use config::{
    AggregatorConfig, BackoffConfig, ClientConfig, PollConfig, EMBEDDED_PORT, EXTERNAL_PORT,
};
pub use engine::{ReconciliationEngine, SnapshotSource, Subscriber, Subscription, SubscriptionStats};
pub use error::{FetchError, FetchResult, StoreError, StoreResult};
pub use report::{ErrorAggregator, ReportLine, ReportSink, TracingSink};
pub use sim::{RotatingStore, DATA_LOST_MESSAGE, DEFAULT_LOSS_RATE};
pub use store::{matches_filter, MemoryConnection, MemoryStore, StoreConnection, StoreConnector};
