//! Store Errors

use thiserror::Error;

/// Errors raised by the store and its backends.
///
/// Missing keys are never an error; they read back as an empty entry.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Value in a persistent backend is not valid JSON
    #[error("malformed payload stored under key `{key}`: {source}")]
    MalformedPayload {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Entry could not be encoded for a string backend
    #[error("failed to serialize entry: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Expiry specification is not `<int>.<unit>` or a minute count
    #[error("invalid expiry specification: {0}")]
    InvalidExpiry(String),

    /// Expiry offset leaves the representable date range
    #[error("expiry offset out of range")]
    ExpiryOutOfRange,

    /// Backend type is not one of local, session or memory
    #[error("unknown backend type: {0}")]
    UnknownBackend(String),

    /// `set` options lack a string `key` field
    #[error("options are missing a string `key` field")]
    MissingKey,

    /// `items` exists under the key but is not an array
    #[error("`items` under key `{key}` is not an array")]
    ItemsNotArray { key: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;
