//! Errors raised while generating a candidate tool.

use forge_adapters::traits::AdapterError;
use forge_policy::{CapabilityCategory, ScanReport};
use thiserror::Error;

/// Why the generator could not produce a candidate.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The completion provider failed.
    #[error("completion provider failed: {source}")]
    Provider {
        /// Adapter error.
        #[from]
        source: AdapterError,
    },
    /// The answer held no parseable JSON object.
    #[error("failed to parse generated tool: {reason}")]
    Parse {
        /// Parser message.
        reason: String,
    },
    /// A required field is missing or has the wrong type.
    #[error("generated tool is missing `{field}`")]
    MissingField {
        /// Field name as it appears in the JSON answer.
        field: &'static str,
    },
    /// The generated handler failed the security scan.
    #[error("generated code failed security scan: blocked {}", join(.categories))]
    SecurityViolation {
        /// Categories of the blocking findings.
        categories: Vec<CapabilityCategory>,
        /// Full scan report.
        report: Box<ScanReport>,
    },
    /// Every attempt failed with a retryable error.
    #[error("generation failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: Box<GenerationError>,
    },
}

impl GenerationError {
    /// Builds a parse error from the supplied reason.
    #[must_use]
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Builds a [`GenerationError::SecurityViolation`] from a failed scan.
    #[must_use]
    pub fn security(report: ScanReport) -> Self {
        Self::SecurityViolation {
            categories: report.blocked_categories(),
            report: Box::new(report),
        }
    }

    /// Whether another attempt with the same prompt may succeed.
    ///
    /// Malformed answers and an unavailable provider are retried; provider
    /// rejections and security violations are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source } => source.is_unavailable(),
            Self::Parse { .. } | Self::MissingField { .. } => true,
            Self::SecurityViolation { .. } | Self::Exhausted { .. } => false,
        }
    }
}

fn join(categories: &[CapabilityCategory]) -> String {
    categories
        .iter()
        .map(|category| category.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for generation.
pub type GenerationResult<T> = Result<T, GenerationError>;
