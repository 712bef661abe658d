//! Admission control for evolution runs.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use forge_primitives::{EvolutionId, ToolName};
use forge_tools::Rejection;
use serde::Serialize;

/// Default number of evolutions allowed in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// A run admitted by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionRun {
    /// Run identifier.
    pub evolution_id: EvolutionId,
    /// Name being evolved.
    pub tool_name: ToolName,
    /// Admission time.
    pub started_at: DateTime<Utc>,
}

type InFlight = Arc<Mutex<HashMap<ToolName, EvolutionRun>>>;

/// Enforces one run per name and a global cap.
///
/// Check-and-insert happens under one short lock; the entry is removed when
/// the returned [`RunPermit`] drops, whatever the exit path.
#[derive(Debug, Clone)]
pub struct EvolutionGate {
    max_concurrent: NonZeroUsize,
    in_flight: InFlight,
}

impl EvolutionGate {
    /// Creates a gate admitting at most `max_concurrent` runs.
    #[must_use]
    pub fn new(max_concurrent: NonZeroUsize) -> Self {
        Self {
            max_concurrent,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the configured cap.
    #[must_use]
    pub const fn max_concurrent(&self) -> NonZeroUsize {
        self.max_concurrent
    }

    /// Admits a run for `tool_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::InFlight`] with the running id when the name is
    /// taken, otherwise [`Rejection::CapReached`] when the cap is hit.
    pub fn try_acquire(&self, tool_name: &ToolName) -> Result<RunPermit, Rejection> {
        let mut runs = lock(&self.in_flight);
        if let Some(run) = runs.get(tool_name) {
            return Err(Rejection::InFlight {
                evolution_id: run.evolution_id,
            });
        }
        if runs.len() >= self.max_concurrent.get() {
            return Err(Rejection::CapReached);
        }

        let run = EvolutionRun {
            evolution_id: EvolutionId::random(),
            tool_name: tool_name.clone(),
            started_at: Utc::now(),
        };
        runs.insert(tool_name.clone(), run.clone());
        Ok(RunPermit {
            run,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Lists runs in flight, oldest first.
    #[must_use]
    pub fn active(&self) -> Vec<EvolutionRun> {
        let mut runs: Vec<_> = lock(&self.in_flight).values().cloned().collect();
        runs.sort_by_key(|run| run.started_at);
        runs
    }

    /// Number of runs in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Returns `true` when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EvolutionGate {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_MAX_CONCURRENT).unwrap_or(NonZeroUsize::MIN))
    }
}

/// Proof of admission. Dropping it releases the name.
#[derive(Debug)]
pub struct RunPermit {
    run: EvolutionRun,
    in_flight: InFlight,
}

impl RunPermit {
    /// Returns the admitted run.
    #[must_use]
    pub fn run(&self) -> &EvolutionRun {
        &self.run
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn evolution_id(&self) -> EvolutionId {
        self.run.evolution_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut runs = lock(&self.in_flight);
        if runs
            .get(&self.run.tool_name)
            .is_some_and(|run| run.evolution_id == self.run.evolution_id)
        {
            runs.remove(&self.run.tool_name);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> ToolName {
        ToolName::new(value).unwrap()
    }

    #[test]
    fn same_name_is_exclusive() {
        let gate = EvolutionGate::default();
        let permit = gate.try_acquire(&name("uuid_gen")).unwrap();
        let rejection = gate.try_acquire(&name("uuid_gen")).unwrap_err();
        assert_eq!(
            rejection,
            Rejection::InFlight {
                evolution_id: permit.evolution_id()
            }
        );

        drop(permit);
        assert!(gate.is_empty());
        assert!(gate.try_acquire(&name("uuid_gen")).is_ok());
    }

    #[test]
    fn cap_limits_distinct_names() {
        let gate = EvolutionGate::new(NonZeroUsize::new(2).unwrap());
        let _a = gate.try_acquire(&name("a")).unwrap();
        let _b = gate.try_acquire(&name("b")).unwrap();
        assert_eq!(gate.try_acquire(&name("c")).unwrap_err(), Rejection::CapReached);
        assert_eq!(gate.active().len(), 2);
    }

    #[test]
    fn permit_released_on_panic() {
        let gate = EvolutionGate::default();
        let cloned = gate.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire(&name("boom")).unwrap();
            panic!("stage exploded");
        });
        assert!(result.is_err());
        assert!(gate.is_empty());
    }
}
