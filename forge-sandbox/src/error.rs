use forge_policy::{CapabilityCategory, ScanReport};
use thiserror::Error;

/// Errors produced while compiling or running a handler.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The security scanner rejected the source.
    #[error("security violation: blocked {}", format_categories(.categories))]
    SecurityViolation {
        /// Categories of the blocking findings.
        categories: Vec<CapabilityCategory>,
        /// Full scan report.
        report: Box<ScanReport>,
    },
    /// The source failed to compile or did not yield a function.
    #[error("compilation failed: {reason}")]
    Compile {
        /// Compiler or loader message.
        reason: String,
    },
    /// The handler exceeded its wall-clock deadline.
    #[error("execution timed out after {timeout_ms} ms")]
    Timeout {
        /// Deadline that was exceeded.
        timeout_ms: u64,
    },
    /// The handler raised an error while running.
    #[error("runtime error: {reason}")]
    Runtime {
        /// Lua error message.
        reason: String,
    },
    /// The handler returned something other than a tool response.
    #[error("invalid response format: {reason}")]
    InvalidOutput {
        /// What was wrong with the value.
        reason: String,
    },
    /// The VM could not be prepared or its worker died.
    #[error("sandbox failure: {reason}")]
    Internal {
        /// Human-readable explanation.
        reason: String,
    },
}

impl SandboxError {
    /// Builds a [`SandboxError::SecurityViolation`] from a failed scan.
    #[must_use]
    pub fn security(report: ScanReport) -> Self {
        Self::SecurityViolation {
            categories: report.blocked_categories(),
            report: Box::new(report),
        }
    }

    /// Convenience constructor for [`SandboxError::Internal`].
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`SandboxError::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn format_categories(categories: &[CapabilityCategory]) -> String {
    categories
        .iter()
        .copied()
        .map(CapabilityCategory::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
