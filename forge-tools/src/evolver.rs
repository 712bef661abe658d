//! Seam between the registry and whatever evolves missing tools.

use std::time::Duration;

use async_trait::async_trait;
use forge_primitives::{EvolutionId, ToolName};
use forge_store::{CreationStage, GeneratedTool};
use serde_json::Value;

/// Request to create a tool that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolveRequest {
    /// Sanitized tool name.
    pub name: ToolName,
    /// Caller's description of the desired behaviour.
    pub description: Option<String>,
}

/// Why an evolution was refused before it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The global in-flight cap is reached.
    CapReached,
    /// The same name is already being evolved.
    InFlight {
        /// Identifier of the run holding the name.
        evolution_id: EvolutionId,
    },
}

impl Rejection {
    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::CapReached => "maximum concurrent evolutions reached".to_owned(),
            Self::InFlight { evolution_id } => {
                format!("tool is already being evolved (evolution {evolution_id})")
            }
        }
    }
}

/// Terminal result of one `evolve` call.
#[derive(Debug, Clone)]
pub enum EvolutionOutcome {
    /// The tool passed every stage and is persisted as active.
    Completed {
        /// Run identifier.
        evolution_id: EvolutionId,
        /// The registered row.
        tool: Box<GeneratedTool>,
        /// Wall-clock time of the run.
        duration: Duration,
    },
    /// A stage failed; the audit log ends with an `error` row.
    Failed {
        /// Run identifier.
        evolution_id: EvolutionId,
        /// Stage that failed.
        stage: CreationStage,
        /// Failure message.
        reason: String,
        /// Stage-specific details such as the sandbox report.
        details: Option<Value>,
    },
    /// The run never started.
    Rejected(Rejection),
}

/// Creates tools on demand. Implemented by the evolution orchestrator.
#[async_trait]
pub trait ToolEvolver: Send + Sync {
    /// Runs (or refuses) an evolution for `request.name`.
    async fn evolve(&self, request: EvolveRequest) -> EvolutionOutcome;

    /// Number of runs currently in flight.
    fn active_count(&self) -> usize;
}
