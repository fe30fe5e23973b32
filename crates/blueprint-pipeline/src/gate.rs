//! Threshold gate applied after each evaluation step.

use serde::{Deserialize, Serialize};

/// Pass when a score is present and at least `threshold` (inclusive).
pub fn gate(score: Option<f64>, threshold: f64) -> bool {
    matches!(score, Some(s) if s >= threshold)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    Passed,
    BelowThreshold,
    ScoreAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    pub score: Option<f64>,
    pub threshold: f64,
    pub verdict: GateVerdict,
}

/// Same rule as [`gate`], with the reason attached.
pub fn evaluate_gate(score: Option<f64>, threshold: f64) -> GateDecision {
    let verdict = match score {
        None => GateVerdict::ScoreAbsent,
        Some(s) if s >= threshold => GateVerdict::Passed,
        Some(_) => GateVerdict::BelowThreshold,
    };
    GateDecision {
        passed: verdict == GateVerdict::Passed,
        score,
        threshold,
        verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        assert!(gate(Some(80.0), 80.0));
        assert!(!gate(Some(79.0), 80.0));
        assert!(gate(Some(100.0), 80.0));
    }

    #[test]
    fn absent_score_never_passes() {
        assert!(!gate(None, 0.0));
        assert!(!gate(None, 80.0));
    }

    #[test]
    fn zero_threshold_passes_any_present_score() {
        assert!(gate(Some(0.0), 0.0));
    }

    #[test]
    fn decision_agrees_with_gate() {
        for (score, threshold) in [
            (Some(80.0), 80.0),
            (Some(79.9), 80.0),
            (None, 80.0),
            (Some(92.0), 80.0),
        ] {
            let decision = evaluate_gate(score, threshold);
            assert_eq!(decision.passed, gate(score, threshold));
        }
    }

    #[test]
    fn decision_verdicts() {
        assert_eq!(evaluate_gate(Some(85.0), 80.0).verdict, GateVerdict::Passed);
        assert_eq!(evaluate_gate(Some(70.0), 80.0).verdict, GateVerdict::BelowThreshold);
        assert_eq!(evaluate_gate(None, 80.0).verdict, GateVerdict::ScoreAbsent);
    }
}
