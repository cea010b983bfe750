//! Error types for ledger query operations.
//!
//! This module defines [`Error`], the primary error type for all query
//! operations, along with a convenient [`Result`] type alias.

use common::StorageError;

/// Error type for ledger query operations.
///
/// # Error Categories
///
/// - [`InvalidArgument`](Error::InvalidArgument): a required parameter was
///   missing or empty. Raised before any store access.
/// - [`Query`](Error::Query): the store rejected a rich-query descriptor.
/// - [`Storage`](Error::Storage): errors from the underlying storage layer,
///   including failures while opening, advancing or closing an iterator.
/// - [`Encoding`](Error::Encoding): stored keys or values could not be decoded.
/// - [`Internal`](Error::Internal): unexpected internal errors that indicate
///   bugs or invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or empty caller-supplied parameter.
    ///
    /// These errors are not retryable; the caller must fix the arguments.
    InvalidArgument(String),

    /// Malformed rich-query descriptor.
    ///
    /// The façade passes descriptors through verbatim, so syntax errors are
    /// reported by the store that evaluates them.
    Query(String),

    /// Storage-related errors from the backing store.
    Storage(String),

    /// Encoding or decoding errors for stored keys and values.
    Encoding(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Query(msg) => write!(f, "Query error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Storage(msg) => Error::Storage(msg),
            StorageError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<common::serde::DeserializeError> for Error {
    fn from(err: common::serde::DeserializeError) -> Self {
        Error::Encoding(err.message)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::InvalidArgument(msg.to_string())
    }
}

/// Result type alias for ledger query operations.
///
/// This is a convenience alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
