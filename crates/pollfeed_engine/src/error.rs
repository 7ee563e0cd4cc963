//! Error types for the engine.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for fetches through a [`ResilientClient`](crate::ResilientClient).
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors raised by an external store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Connection URL.
        url: String,
        /// Transport error message.
        message: String,
    },

    /// A read failed on an open connection.
    #[error("read from {collection} failed: {message}")]
    Read {
        /// Collection that was read.
        collection: String,
        /// Error message.
        message: String,
    },

    /// The connection was closed.
    #[error("connection closed")]
    Closed,
}

impl StoreError {
    /// Creates a connection error.
    pub fn connect(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a read error.
    pub fn read(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Read {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Returns true if the failure belongs to the connection rather than
    /// the operation, so the operation can succeed once the client
    /// reconnects.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connect { .. } | StoreError::Closed)
    }
}

/// Errors returned by a fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Disconnected and nothing cached for the query.
    #[error("Server at {url} unavailable")]
    Unavailable {
        /// Connection URL of the store.
        url: String,
    },

    /// A live read failed while connected.
    #[error(transparent)]
    Transient(#[from] StoreError),
}

impl FetchError {
    /// Returns true if the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, FetchError::Unavailable { .. })
    }
}
