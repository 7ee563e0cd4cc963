//! Queries and cache keys.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// A read against one collection of the external store.
///
/// Both parts are opaque to pollfeed and passed through to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Selection filter.
    pub filter: Value,
    /// Read options such as sort or projection.
    pub options: Value,
}

impl Query {
    /// Creates a query that selects every document.
    pub fn all() -> Self {
        Self {
            filter: json!({}),
            options: json!({}),
        }
    }

    /// Sets the filter.
    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the options.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Computes the cache key of this query against `collection`.
    pub fn key(&self, collection: &str) -> QueryKey {
        QueryKey::new(collection, self)
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

/// Deterministic hash of (collection, filter, options).
///
/// JSON objects serialize with sorted keys, so two queries that differ only
/// in the order their fields were written map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(u64);

impl QueryKey {
    /// Computes the key for a query.
    pub fn new(collection: &str, query: &Query) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update([0u8]);
        hasher.update(query.filter.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(query.options.to_string().as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    /// Returns the raw key value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let query = Query::all().with_filter(json!({"lang": "fr", "level": 2}));
        assert_eq!(query.key("cards"), query.key("cards"));

        let reordered = Query::all().with_filter(json!({"level": 2, "lang": "fr"}));
        assert_eq!(query.key("cards"), reordered.key("cards"));
    }

    #[test]
    fn key_depends_on_every_part() {
        let base = Query::all();
        let other_collection = base.key("wild");
        let other_filter = base.clone().with_filter(json!({"_id": "1"})).key("tame");
        let other_options = base.clone().with_options(json!({"sort": {"_id": 1}})).key("tame");

        let key = base.key("tame");
        assert_ne!(key, other_collection);
        assert_ne!(key, other_filter);
        assert_ne!(key, other_options);
    }

    #[test]
    fn collection_and_filter_do_not_bleed() {
        // "ab" + "{}" must not collide with "a" + "b{}"-style concatenations.
        let a = QueryKey::new("ab", &Query::all());
        let b = QueryKey::new("a", &Query::all().with_filter(json!("b")));
        assert_ne!(a, b);
    }

    #[test]
    fn key_display_is_hex() {
        let key = Query::all().key("wild");
        let text = key.to_string();
        assert_eq!(text.len(), 16);
        assert_eq!(u64::from_str_radix(&text, 16).unwrap(), key.as_u64());
    }
}
