use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{BlueprintError, Result};
use crate::outcome::Outcome;
use crate::step::StepKind;

// ---------------------------------------------------------------------------
// StepOutcome: engine-level wrapper around one step's Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: StepKind,
    pub outcome: Outcome,
    /// Score reported by an evaluation step; always `None` for productive steps.
    pub score: Option<f64>,
    /// Whether the quality gate passed; always `false` for productive steps.
    pub gate_passed: bool,
    #[serde(with = "crate::duration_serde")]
    pub elapsed: Duration,
    /// Capability attempts consumed, including the first.
    pub attempts: usize,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded
    }

    /// Whether this outcome stops the pipeline.
    pub fn halts(&self) -> bool {
        !self.outcome.succeeded || (self.step.is_evaluation() && !self.gate_passed)
    }

    /// Why this outcome stops the pipeline, if it does.
    pub fn halt_reason(&self, threshold: f64) -> Option<HaltReason> {
        if !self.outcome.succeeded {
            return Some(HaltReason::StepFailed {
                step: self.step,
                reason: self.outcome.failure_reason.clone().unwrap_or_default(),
            });
        }
        if self.step.is_evaluation() && !self.gate_passed {
            return Some(HaltReason::GateFailed {
                step: self.step,
                score: self.score,
                threshold,
            });
        }
        None
    }
}

// ---------------------------------------------------------------------------
// HaltReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum HaltReason {
    /// The capability failed after exhausting its retry budget.
    StepFailed { step: StepKind, reason: String },
    /// An evaluation step's score was absent or below the threshold.
    GateFailed {
        step: StepKind,
        score: Option<f64>,
        threshold: f64,
    },
}

impl HaltReason {
    pub fn step(&self) -> StepKind {
        match self {
            HaltReason::StepFailed { step, .. } | HaltReason::GateFailed { step, .. } => *step,
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::StepFailed { step, reason } => {
                write!(f, "step '{}' failed: {}", step, reason)
            }
            HaltReason::GateFailed {
                step,
                score: Some(score),
                threshold,
            } => write!(
                f,
                "step '{}' scored {} which is below the threshold of {}",
                step, score, threshold
            ),
            HaltReason::GateFailed {
                step,
                score: None,
                threshold,
            } => write!(
                f,
                "step '{}' reported no usable score (threshold {})",
                step, threshold
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineRun: append-only record of one execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub config: PipelineConfig,
    outcomes: Vec<StepOutcome>,
}

impl PipelineRun {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            outcomes: Vec::new(),
        }
    }

    /// Append the next step's outcome.
    ///
    /// Outcomes must arrive in pipeline order and nothing may follow a halting
    /// outcome or the final step.
    pub fn record(&mut self, outcome: StepOutcome) -> Result<()> {
        if self.is_finished() {
            return Err(BlueprintError::RunSequence {
                step: outcome.step.to_string(),
                message: "run has already finished".into(),
            });
        }
        let expected = StepKind::ALL[self.outcomes.len()];
        if outcome.step != expected {
            return Err(BlueprintError::RunSequence {
                step: outcome.step.to_string(),
                message: format!("expected step '{}'", expected),
            });
        }
        self.outcomes.push(outcome);
        Ok(())
    }

    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    pub fn last(&self) -> Option<&StepOutcome> {
        self.outcomes.last()
    }

    pub fn outcome_for(&self, step: StepKind) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step == step)
    }

    /// True once the last outcome halts or all four steps have run.
    pub fn is_finished(&self) -> bool {
        self.outcomes.len() == StepKind::ALL.len() || self.last().is_some_and(|o| o.halts())
    }

    /// Why the run stopped, derived from its last outcome.
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.last()
            .and_then(|o| o.halt_reason(self.config.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(
        kind: StepKind,
        outcome: Outcome,
        score: Option<f64>,
        gate_passed: bool,
    ) -> StepOutcome {
        StepOutcome {
            step: kind,
            outcome,
            score,
            gate_passed,
            elapsed: Duration::from_millis(5),
            attempts: 1,
        }
    }

    #[test]
    fn record_accepts_pipeline_order() {
        let mut run = PipelineRun::new(PipelineConfig::default());
        run.record(step(StepKind::Parse, Outcome::success("d"), None, false))
            .unwrap();
        run.record(step(
            StepKind::EvaluateParse,
            Outcome::success("{}"),
            Some(90.0),
            true,
        ))
        .unwrap();
        assert_eq!(run.outcomes().len(), 2);
        assert!(!run.is_finished());
        assert!(run.halt_reason().is_none());
    }

    #[test]
    fn record_rejects_out_of_order_step() {
        let mut run = PipelineRun::new(PipelineConfig::default());
        let err = run
            .record(step(StepKind::Generate, Outcome::success("x"), None, false))
            .unwrap_err();
        assert!(matches!(err, BlueprintError::RunSequence { .. }));
        assert!(run.outcomes().is_empty());
    }

    #[test]
    fn record_rejects_after_halt() {
        let mut run = PipelineRun::new(PipelineConfig::default());
        run.record(step(StepKind::Parse, Outcome::fail("down"), None, false))
            .unwrap();
        assert!(run.is_finished());
        assert!(run
            .record(step(
                StepKind::EvaluateParse,
                Outcome::success("{}"),
                Some(90.0),
                true
            ))
            .is_err());
        assert_eq!(
            run.halt_reason(),
            Some(HaltReason::StepFailed {
                step: StepKind::Parse,
                reason: "down".into()
            })
        );
    }

    #[test]
    fn gate_failure_is_a_halt_reason() {
        let mut run = PipelineRun::new(PipelineConfig::default());
        run.record(step(StepKind::Parse, Outcome::success("d"), None, false))
            .unwrap();
        run.record(step(
            StepKind::EvaluateParse,
            Outcome::success("{}"),
            Some(70.0),
            false,
        ))
        .unwrap();
        let halt = run.halt_reason().unwrap();
        assert_eq!(halt.step(), StepKind::EvaluateParse);
        assert_eq!(
            halt.to_string(),
            "step 'evaluate_parse' scored 70 which is below the threshold of 80"
        );
    }

    #[test]
    fn productive_step_without_gate_does_not_halt() {
        let o = step(StepKind::Generate, Outcome::success("main.tf"), None, false);
        assert!(!o.halts());
        assert!(o.halt_reason(80.0).is_none());
    }

    #[test]
    fn halt_reason_serializes_with_rule_tag() {
        let halt = HaltReason::GateFailed {
            step: StepKind::EvaluateGenerate,
            score: None,
            threshold: 80.0,
        };
        let json = serde_json::to_value(&halt).unwrap();
        assert_eq!(json["rule"], "gate_failed");
        assert_eq!(json["step"], "evaluate_generate");
        assert!(json["score"].is_null());
    }
}
