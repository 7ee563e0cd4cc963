//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The value is not a JSON object.
    #[error("document must be a JSON object, got {kind}")]
    NotAnObject {
        /// JSON kind that was found instead.
        kind: &'static str,
    },

    /// The object has no `_id` field.
    #[error("document has no _id field")]
    MissingId,

    /// The `_id` field cannot be used as a document id.
    #[error("document _id must be a string or a number, got {kind}")]
    InvalidId {
        /// JSON kind of the `_id` value.
        kind: &'static str,
    },
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
