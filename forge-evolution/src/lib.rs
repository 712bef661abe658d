//! Evolution pipeline for tools that do not exist yet.
//!
//! [`EvolutionOrchestrator`] admits a run through the [`EvolutionGate`],
//! searches discovery sources, asks the [`Generator`] for a candidate, tests
//! it in the sandbox and registers it in the store. Each stage is recorded in
//! the audit log.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod gate;
pub mod generator;
pub mod lifecycle;
pub mod orchestrator;
mod parse;
pub mod prompt;

pub use error::{GenerationError, GenerationResult};
pub use gate::{DEFAULT_MAX_CONCURRENT, EvolutionGate, EvolutionRun, RunPermit};
pub use generator::{
    Analysis, Approach, GenerationOutcome, Generator, GeneratorConfig, MAX_REFERENCES, Reference,
};
pub use lifecycle::{LifecycleError, LifecycleResult, RunLifecycle};
pub use orchestrator::{EvolutionOrchestrator, OrchestratorConfig};
pub use parse::{extract_json, parse_candidate};
