//! Error types for the Tidepool engine.

use thiserror::Error;

/// All possible errors from the Tidepool engine.
///
/// Only malformed arguments fail. Looking up an identifier that is not in the
/// store is not an error: reads and filters return an empty result instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Argument errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
