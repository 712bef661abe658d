//! Core shared types for the toolforge runtime.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod name;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Opaque identifiers for tools, evolution runs, and audit rows.
pub use ids::{EvolutionId, LogId, ToolId};
/// Validated, sanitized tool name.
pub use name::{MAX_TOOL_NAME_LEN, ToolName};
