//! # pollfeed Protocol
//!
//! Document, query and delta types for pollfeed.
//!
//! This crate provides:
//! - `Document` for records read from an external store
//! - `Query` and `QueryKey` for addressing cached snapshots
//! - `PublishedSet` and `diff` for turning snapshots into deltas
//! - `FeedEvent` for the subscriber-facing event stream
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Diffing
//!
//! Deltas are computed from full snapshots with plain set algebra:
//!
//! - `removed = published − fetched`
//! - `added   = fetched − published`
//! - `kept    = fetched ∩ published`
//!
//! Every kept document is reported as changed, whether or not its content
//! differs from the previous poll.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod event;
mod published;
mod query;

pub use document::{Document, STALE_MARKER_ID};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{replay, FeedEvent};
pub use published::{diff, Delta, PublishedSet, Upsert};
pub use query::{Query, QueryKey};
