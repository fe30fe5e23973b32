//! Turns a finished run into instructions for whoever picks it up next.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use blueprint_types::{duration_serde, ContextKey, HaltReason, StepKind};

use crate::engine::PipelineResult;

/// A phase carried out by hand once the automated pipeline is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPhase {
    pub number: usize,
    pub name: String,
    pub description: String,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    ExecutionFailed,
    BelowThreshold,
    ScoreAbsent,
}

/// Why one step kept the run from being ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub step: StepKind,
    pub kind: FindingKind,
    pub detail: String,
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Handoff {
    Ready {
        artifact: String,
        description: String,
        next_phases: Vec<ManualPhase>,
    },
    NotReady {
        halt: Option<HaltReason>,
        findings: Vec<Finding>,
        recommendations: Vec<String>,
    },
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The manual phases that follow a ready run.
pub fn manual_phases() -> Vec<ManualPhase> {
    vec![
        ManualPhase {
            number: 5,
            name: "Artifact Execution".into(),
            description: "Execute the generated infrastructure code".into(),
            instructions: lines(&[
                "Change into the directory holding the generated files",
                "Initialize the working directory: terraform init",
                "Plan the deployment: terraform plan",
                "Review the plan carefully",
                "Apply if satisfied: terraform apply",
            ]),
        },
        ManualPhase {
            number: 6,
            name: "Deployment Validation".into(),
            description: "Deploy and validate the provisioned infrastructure".into(),
            instructions: lines(&[
                "Verify cloud credentials are configured",
                "Confirm all resources were created successfully",
                "Test the deployed infrastructure",
                "Monitor the deployment in the provider console",
                "Validate the architecture matches the original input",
            ]),
        },
    ]
}

fn recommendations(findings: &[Finding]) -> Vec<String> {
    let mut out = Vec::new();
    if findings
        .iter()
        .any(|f| f.kind != FindingKind::ExecutionFailed)
    {
        out.push("Review the evaluation feedback in the session record for quality gaps".into());
        out.push("Consider adjusting the evaluation threshold if the gate is too strict".into());
    }
    if findings
        .iter()
        .any(|f| f.kind == FindingKind::ExecutionFailed)
    {
        out.push("Check provider credentials, network connectivity, and the input data".into());
        out.push("Verify the required environment variables are set in your .env file".into());
    }
    out.push("Re-run the pipeline once the issues are addressed".into());
    out
}

impl Handoff {
    pub fn from_result(result: &PipelineResult) -> Self {
        if result.summary.ready_for_next_phase {
            return Handoff::Ready {
                artifact: result
                    .final_context
                    .get_string(ContextKey::GeneratedArtifact.as_str(), ""),
                description: result
                    .final_context
                    .get_string(ContextKey::ParsedDescription.as_str(), ""),
                next_phases: manual_phases(),
            };
        }

        let threshold = result.run.config.threshold;
        let findings: Vec<Finding> = result
            .run
            .outcomes()
            .iter()
            .filter_map(|o| {
                let (kind, detail) = if !o.succeeded() {
                    (
                        FindingKind::ExecutionFailed,
                        o.outcome.failure_reason.clone().unwrap_or_default(),
                    )
                } else if o.step.is_evaluation() && !o.gate_passed {
                    match o.score {
                        Some(score) => (
                            FindingKind::BelowThreshold,
                            format!("score {} (required {})", score, threshold),
                        ),
                        None => (
                            FindingKind::ScoreAbsent,
                            "evaluation reported no usable score".to_string(),
                        ),
                    }
                } else {
                    return None;
                };
                Some(Finding {
                    step: o.step,
                    kind,
                    detail,
                    elapsed: o.elapsed,
                })
            })
            .collect();

        Handoff::NotReady {
            halt: result.summary.halt.clone(),
            recommendations: recommendations(&findings),
            findings,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Handoff::Ready { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::summarize;
    use blueprint_types::{ExecutionContext, Outcome, PipelineConfig, PipelineRun, StepOutcome};

    fn result_with(steps: Vec<(StepKind, Outcome, Option<f64>)>) -> PipelineResult {
        let mut run = PipelineRun::new(PipelineConfig::default());
        let mut context = ExecutionContext::new();
        for (step, outcome, score) in steps {
            if let (true, Some(key)) = (outcome.succeeded, step.output_key()) {
                context.set_artifact(key, outcome.content.clone());
            }
            let gate_passed = step.is_evaluation() && score.is_some_and(|s| s >= 80.0);
            run.record(StepOutcome {
                step,
                outcome,
                score,
                gate_passed,
                elapsed: Duration::from_millis(10),
                attempts: 1,
            })
            .unwrap();
        }
        PipelineResult {
            summary: summarize(&run),
            run,
            final_context: context,
        }
    }

    #[test]
    fn ready_run_lists_manual_phases() {
        let result = result_with(vec![
            (StepKind::Parse, Outcome::success("vpc with two subnets"), None),
            (StepKind::EvaluateParse, Outcome::success("{}"), Some(85.0)),
            (StepKind::Generate, Outcome::success("resource \"aws_vpc\" \"main\" {}"), None),
            (StepKind::EvaluateGenerate, Outcome::success("{}"), Some(92.0)),
        ]);
        let handoff = Handoff::from_result(&result);
        assert!(handoff.is_ready());
        match handoff {
            Handoff::Ready {
                artifact,
                description,
                next_phases,
            } => {
                assert!(artifact.contains("aws_vpc"));
                assert_eq!(description, "vpc with two subnets");
                assert_eq!(next_phases.len(), 2);
                assert_eq!(next_phases[0].number, 5);
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn gate_failure_produces_threshold_finding() {
        let result = result_with(vec![
            (StepKind::Parse, Outcome::success("vpc"), None),
            (StepKind::EvaluateParse, Outcome::success("{}"), Some(70.0)),
        ]);
        match Handoff::from_result(&result) {
            Handoff::NotReady {
                halt,
                findings,
                recommendations,
            } => {
                assert!(matches!(halt, Some(HaltReason::GateFailed { .. })));
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].kind, FindingKind::BelowThreshold);
                assert_eq!(findings[0].detail, "score 70 (required 80)");
                assert!(recommendations.iter().any(|r| r.contains("threshold")));
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
    }

    #[test]
    fn execution_failure_recommends_checking_credentials() {
        let result = result_with(vec![(StepKind::Parse, Outcome::fail("auth failed"), None)]);
        match Handoff::from_result(&result) {
            Handoff::NotReady {
                findings,
                recommendations,
                ..
            } => {
                assert_eq!(findings[0].kind, FindingKind::ExecutionFailed);
                assert_eq!(findings[0].detail, "auth failed");
                assert!(recommendations.iter().any(|r| r.contains("credentials")));
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
    }

    #[test]
    fn handoff_serializes_with_status_tag() {
        let result = result_with(vec![
            (StepKind::Parse, Outcome::success("vpc"), None),
            (StepKind::EvaluateParse, Outcome::success("{}"), None),
        ]);
        let json = serde_json::to_value(Handoff::from_result(&result)).unwrap();
        assert_eq!(json["status"], "not_ready");
        assert_eq!(json["findings"][0]["kind"], "score_absent");
    }
}
