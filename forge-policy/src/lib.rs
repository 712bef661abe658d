//! Security policy for generated tool handlers.
//!
//! The scanner here is a pure function over source text: it never executes the
//! code it inspects. Every handler is scanned once when the generator parses a
//! candidate and again by the sandbox before each compilation.

#![warn(missing_docs, clippy::pedantic)]

pub mod category;
pub mod rules;
pub mod scanner;

pub use category::{CapabilityCategory, Severity};
pub use rules::{ScanRule, default_rules};
pub use scanner::{ScanIssue, ScanReport, SecurityScanner, SeverityCounts};

use thiserror::Error;

/// Errors surfaced while assembling scanner rules.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Rule configuration error.
    #[error("invalid scan rule `{name}`: {reason}")]
    InvalidRule {
        /// Name of the offending rule.
        name: String,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
