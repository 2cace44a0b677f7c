//! Error taxonomy shared by every Fathom crate.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
///
/// Variants map one-to-one onto the HTTP statuses the server reports:
/// `Client`/`MissingType`/`Serialisation` are 400s, `NotFound` 404,
/// `DocVersionConflict` 409, `Conflict` 503, `Timeout` 504 and
/// `Corruption`/`Backend` 500.
#[derive(Error, Debug)]
pub enum Error {
    /// User input is inconsistent with the schema or malformed.
    #[error("{0}")]
    Client(String),

    /// A strict-mode field arrived without an explicit type.
    #[error("Type of field {field} is missing")]
    MissingType { field: String },

    /// Value cannot be parsed into its declared type.
    #[error("Cannot serialise {field}: {reason}")]
    Serialisation { field: String, reason: String },

    /// Stored schema violates an invariant.
    #[error("Schema corruption: {0}")]
    Corruption(String),

    /// Document id conflict on a non-replace write.
    #[error("Document already exists: {0}")]
    DocVersionConflict(String),

    /// Writable checkout denied (switch in progress or ref conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Checkout or backend operation exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Index Backend failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a client error
    pub fn client(msg: impl Into<String>) -> Self {
        Error::Client(msg.into())
    }

    /// Create a missing-type error for a field path
    pub fn missing_type(field: impl Into<String>) -> Self {
        Error::MissingType {
            field: field.into(),
        }
    }

    /// Create a serialisation error at a field path
    pub fn serialisation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Serialisation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }
}
