//! Error types for the tool store.

use forge_primitives::ToolId;
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A generated tool with the same name already exists.
    #[error("generated tool `{name}` already exists")]
    Conflict {
        /// Conflicting tool name.
        name: String,
    },
    /// No generated tool has the given id.
    #[error("generated tool {id} not found")]
    NotFound {
        /// Missing id.
        id: ToolId,
    },
    /// Underlying I/O failure while reading or writing the store file.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
    /// A stored line could not be replayed.
    #[error("corrupt store entry at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Parser message.
        reason: String,
    },
}

impl StoreError {
    /// Returns `true` for [`StoreError::Conflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
