//! Stage machine for one evolution run.

use forge_primitives::EvolutionId;
use forge_store::CreationStage;
use thiserror::Error;
use tracing::debug;

/// Tracks the stage an evolution run occupies.
#[derive(Debug, Clone, Copy)]
pub struct RunLifecycle {
    evolution_id: EvolutionId,
    stage: CreationStage,
}

impl RunLifecycle {
    /// Starts a run in [`CreationStage::Started`].
    #[must_use]
    pub const fn new(evolution_id: EvolutionId) -> Self {
        Self {
            evolution_id,
            stage: CreationStage::Started,
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn evolution_id(&self) -> EvolutionId {
        self.evolution_id
    }

    /// Returns the current stage.
    #[must_use]
    pub const fn stage(&self) -> CreationStage {
        self.stage
    }

    /// Moves to `next`.
    ///
    /// Stages advance strictly in pipeline order; `error` is reachable from
    /// every non-terminal stage.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] for any other move.
    pub fn advance(&mut self, next: CreationStage) -> LifecycleResult<CreationStage> {
        use CreationStage as S;

        let allowed = matches!(
            (self.stage, next),
            (S::Started, S::Discovery)
                | (S::Discovery, S::Generation)
                | (S::Generation, S::Testing)
                | (S::Testing, S::Registration)
                | (S::Registration, S::Completed)
        ) || (next == S::Error && !self.stage.is_terminal());

        if !allowed {
            return Err(LifecycleError::InvalidTransition {
                evolution_id: self.evolution_id,
                from: self.stage,
                to: next,
            });
        }

        debug!(
            evolution_id = %self.evolution_id,
            from = ?self.stage,
            to = ?next,
            "evolution stage transition"
        );
        self.stage = next;
        Ok(next)
    }
}

/// Errors emitted by the stage machine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Transition was not permitted from the current stage.
    #[error("invalid stage transition from {from} to {to} for evolution {evolution_id}")]
    InvalidTransition {
        /// Run whose transition failed.
        evolution_id: EvolutionId,
        /// Stage prior to the attempted transition.
        from: CreationStage,
        /// Requested stage.
        to: CreationStage,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
