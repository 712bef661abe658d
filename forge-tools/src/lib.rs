//! Tool registry, built-in tools and the auto-evolve seam.
//!
//! [`ToolRegistry::execute`] is the single entry point transports call. It
//! dispatches to a built-in, then to an active generated tool, and finally,
//! when allowed, asks the attached [`ToolEvolver`] to create the tool.

#![warn(missing_docs, clippy::pedantic)]

pub mod builtin;
mod error;
pub mod evolver;
pub mod registry;
pub mod types;

pub use builtin::register_builtins;
pub use error::{RegistryError, RegistryResult, ToolError, ToolResult};
pub use evolver::{EvolutionOutcome, EvolveRequest, Rejection, ToolEvolver};
pub use registry::{RegistryStats, Tool, ToolHandle, ToolRegistry};
pub use types::{ExecutionContext, ExecutionMode, ToolCallResult, ToolDefinition};
