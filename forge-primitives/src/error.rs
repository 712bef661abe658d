//! Shared error definitions for toolforge primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the toolforge runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided identifier could not be parsed.
    #[error("invalid identifier: {source}")]
    InvalidId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Tool name failed validation.
    #[error("invalid tool name `{name}`: {reason}")]
    InvalidToolName {
        /// The offending name as supplied by the caller.
        name: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}
