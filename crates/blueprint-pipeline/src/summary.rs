//! Aggregate report derived from a finished run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blueprint_types::{duration_serde, HaltReason, PipelineRun, StepKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: Uuid,
    pub total_steps: usize,
    pub max_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
    #[serde(with = "duration_serde")]
    pub total_elapsed: Duration,
    /// Evaluation steps that ran, mapped to the score they reported.
    pub scores: BTreeMap<StepKind, Option<f64>>,
    pub threshold: f64,
    pub halt: Option<HaltReason>,
    pub ready_for_next_phase: bool,
}

impl Summary {
    /// Steps that finished successfully, as a percentage of those that ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.successful_steps as f64 / self.total_steps as f64 * 100.0
        }
    }
}

/// Derive the summary of `run`. Pure and deterministic.
pub fn summarize(run: &PipelineRun) -> Summary {
    let outcomes = run.outcomes();
    let successful_steps = outcomes.iter().filter(|o| o.succeeded()).count();
    let scores = outcomes
        .iter()
        .filter(|o| o.step.is_evaluation())
        .map(|o| (o.step, o.score))
        .collect();
    let ready_for_next_phase = outcomes.len() == StepKind::ALL.len()
        && successful_steps == outcomes.len()
        && outcomes.last().is_some_and(|o| o.gate_passed);

    Summary {
        run_id: run.run_id,
        total_steps: outcomes.len(),
        max_steps: StepKind::ALL.len(),
        successful_steps,
        failed_steps: outcomes.len() - successful_steps,
        total_elapsed: outcomes.iter().map(|o| o.elapsed).sum(),
        scores,
        threshold: run.config.threshold,
        halt: run.halt_reason(),
        ready_for_next_phase,
    }
}
