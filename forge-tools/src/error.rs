//! Errors produced by tool registration and invocation.

use forge_store::StoreError;
use thiserror::Error;

/// Result alias for tool implementations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors returned by a [`crate::registry::Tool`] implementation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match the tool's schema.
    #[error("invalid arguments: {reason}")]
    InvalidArguments {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool execution failed.
    #[error("tool execution failed: {reason}")]
    Execution {
        /// Human-readable error returned by the tool implementation.
        reason: String,
    },
}

impl ToolError {
    /// Creates an argument error from the supplied reason.
    #[must_use]
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            reason: reason.into(),
        }
    }

    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

/// Errors that escape [`crate::registry::ToolRegistry`] instead of becoming an
/// `isError` response.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Bad tool name or malformed arguments.
    #[error("validation failed: {reason}")]
    Validation {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Requested tool does not exist and was not evolved.
    #[error("tool `{name}` is not registered")]
    NotFound {
        /// Name of the missing tool.
        name: String,
    },

    /// Tool name collided with an existing registration.
    #[error("tool `{name}` is already registered")]
    Duplicate {
        /// Name of the offending tool.
        name: String,
    },

    /// The durable store failed.
    #[error("store error: {source}")]
    Store {
        /// Source error.
        #[from]
        source: StoreError,
    },
}

impl RegistryError {
    /// Creates a validation error from the supplied reason.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// HTTP-style status code for transports.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Duplicate { .. } => 409,
            Self::Store { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(RegistryError::validation("bad").status_code(), 400);
        assert_eq!(
            RegistryError::NotFound { name: "x".into() }.status_code(),
            404
        );
        assert_eq!(
            RegistryError::Duplicate { name: "x".into() }.status_code(),
            409
        );
    }
}
