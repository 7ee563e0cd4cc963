//! Documents read from an external store.

use crate::error::{json_kind, ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id of the marker document prepended to snapshots served from cache.
pub const STALE_MARKER_ID: &str = "__WARNING__ – from cache";

/// A record identified by a unique string id.
///
/// The field set is opaque: it is carried through unchanged from the store
/// to the subscriber. On the wire the id is the `_id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// All other fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Creates a document with no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Adds a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Creates the marker document that heads a cached snapshot.
    pub fn stale_marker() -> Self {
        Self::new(STALE_MARKER_ID)
    }

    /// Returns true if this is the cache marker document.
    pub fn is_stale_marker(&self) -> bool {
        self.id == STALE_MARKER_ID
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Decodes a document from a JSON object.
    ///
    /// Numeric ids are accepted and converted to their decimal string form.
    pub fn from_json(value: Value) -> ProtocolResult<Self> {
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(ProtocolError::NotAnObject {
                    kind: json_kind(&other),
                })
            }
        };

        let id = match fields.remove("_id") {
            Some(Value::String(id)) => id,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(ProtocolError::InvalidId {
                    kind: json_kind(&other),
                })
            }
            None => return Err(ProtocolError::MissingId),
        };

        Ok(Self { id, fields })
    }

    /// Encodes the document as a JSON object with an `_id` field.
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert("_id".into(), Value::String(self.id.clone()));
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.clone());
        }
        Value::Object(map)
    }
}
