//! Pipeline execution engine: the fixed four-step loop.
//!
//! Each run walks parse, evaluate_parse, generate and evaluate_generate in
//! order, invoking the capability bound to each step's role through the retry
//! wrapper, recording a [`StepOutcome`], and halting on the first failure or
//! failed quality gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use blueprint_types::{
    BlueprintError, ContextKey, ExecutionContext, Outcome, PipelineConfig, PipelineRun, Result,
    StepKind, StepOutcome,
};

use crate::capability::{
    Capability, CapabilityRegistry, CapabilityRequest, ORIGINAL_INPUT_KEY, REQUIREMENTS_KEY,
};
use crate::gate::evaluate_gate;
use crate::retry::execute_with_retry;
use crate::summary::{summarize, Summary};
use crate::telemetry::{input_preview, TelemetrySink};
use crate::validation::{validate_or_raise, Severity};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Runs the four-step pipeline. Immutable once built, so one engine can be
/// shared across concurrent runs.
#[derive(Debug, Clone)]
pub struct PipelineEngine {
    config: PipelineConfig,
    registry: CapabilityRegistry,
}

/// The result of a completed (or halted) pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run: PipelineRun,
    pub summary: Summary,
    pub final_context: ExecutionContext,
}

impl PipelineResult {
    pub fn is_ready(&self) -> bool {
        self.summary.ready_for_next_phase
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn notify(hook: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(hook, error = %e, "Telemetry sink error ignored");
    }
}

/// Build the request for `step` strictly from what earlier steps left in the
/// context.
fn build_request(step: StepKind, context: &ExecutionContext) -> Result<CapabilityRequest> {
    let artifact = |key: ContextKey| -> Result<String> {
        context
            .artifact(key)
            .map(str::to_owned)
            .ok_or_else(|| BlueprintError::RunSequence {
                step: step.to_string(),
                message: format!("context is missing '{}'", key.as_str()),
            })
    };

    let request = match step {
        StepKind::Parse => CapabilityRequest::new(step, artifact(ContextKey::OriginalInput)?),
        StepKind::EvaluateParse => {
            CapabilityRequest::new(step, artifact(ContextKey::ParsedDescription)?)
                .with_context(ORIGINAL_INPUT_KEY, artifact(ContextKey::OriginalInput)?)
        }
        StepKind::Generate => {
            CapabilityRequest::new(step, artifact(ContextKey::ParsedDescription)?)
        }
        StepKind::EvaluateGenerate => {
            CapabilityRequest::new(step, artifact(ContextKey::GeneratedArtifact)?)
                .with_context(REQUIREMENTS_KEY, artifact(ContextKey::ParsedDescription)?)
        }
    };
    Ok(request)
}

/// One attempt, bounded by the per-attempt deadline.
async fn invoke_with_timeout(
    capability: &dyn Capability,
    request: &CapabilityRequest,
    timeout: Duration,
) -> Result<Outcome> {
    match tokio::time::timeout(timeout, capability.invoke(request)).await {
        Ok(result) => result,
        Err(_) => Err(BlueprintError::CapabilityTimeout {
            step: request.step.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Normalize an outcome and reject successes with empty content where the
/// step does not permit them.
fn enforce_outcome_shape(step: StepKind, capability: &dyn Capability, outcome: Outcome) -> Outcome {
    let outcome = outcome.normalized();
    if !outcome.succeeded || !outcome.content.trim().is_empty() {
        return outcome;
    }
    if step.is_evaluation() {
        Outcome::fail(format!(
            "capability '{}' returned an empty evaluation",
            capability.name()
        ))
    } else if !capability.allows_empty_content() {
        Outcome::fail(format!(
            "capability '{}' returned empty content",
            capability.name()
        ))
    } else {
        outcome
    }
}

// ---------------------------------------------------------------------------
// PipelineEngine
// ---------------------------------------------------------------------------

impl PipelineEngine {
    /// Validate the configuration and bindings and build an engine.
    pub fn new(config: PipelineConfig, registry: CapabilityRegistry) -> Result<Self> {
        for diag in validate_or_raise(&config, &registry)? {
            match diag.severity {
                Severity::Warning => tracing::warn!(rule = %diag.rule, "{}", diag.message),
                _ => tracing::info!(rule = %diag.rule, "{}", diag.message),
            }
        }
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    fn capability_for(&self, step: StepKind) -> Result<Arc<dyn Capability>> {
        self.registry
            .get(step.role())
            .cloned()
            .ok_or_else(|| BlueprintError::MissingCapability {
                role: step.role().to_string(),
            })
    }

    /// Execute one run against `initial_input`.
    ///
    /// Returns `Err` only for precondition failures detected before any step
    /// runs. Step failures and failed gates halt the run and are reported in
    /// the returned [`PipelineResult`].
    pub async fn run(
        &self,
        initial_input: &str,
        sink: &mut dyn TelemetrySink,
    ) -> Result<PipelineResult> {
        if initial_input.trim().is_empty() {
            return Err(BlueprintError::InvalidInput(
                "initial input must not be empty".into(),
            ));
        }

        let mut run = PipelineRun::new(self.config.clone());
        let mut context = ExecutionContext::new();
        context.set_artifact(ContextKey::OriginalInput, initial_input);

        tracing::info!(run_id = %run.run_id, "Starting pipeline run");
        notify("on_run_start", sink.on_run_start(run.run_id, &self.config));

        for step in StepKind::ALL {
            let capability = self.capability_for(step)?;
            let request = build_request(step, &context)?;
            notify(
                "on_step_start",
                sink.on_step_start(step, input_preview(&request.payload)),
            );
            tracing::debug!(step = %step, capability = capability.name(), "Invoking capability");

            let started = Instant::now();
            let retried = execute_with_retry(
                || invoke_with_timeout(capability.as_ref(), &request, self.config.timeout),
                self.config.max_retries,
                &self.config.backoff,
                step,
            )
            .await;
            let elapsed = started.elapsed();

            let outcome = enforce_outcome_shape(step, capability.as_ref(), retried.outcome);
            let (score, gate_passed) = if step.is_evaluation() && outcome.succeeded {
                let decision = evaluate_gate(outcome.score(), self.config.threshold);
                tracing::debug!(step = %step, verdict = ?decision.verdict, "Gate evaluated");
                (decision.score, decision.passed)
            } else {
                (None, false)
            };

            let step_outcome = StepOutcome {
                step,
                outcome,
                score,
                gate_passed,
                elapsed,
                attempts: retried.attempts,
            };
            run.record(step_outcome.clone())?;
            notify("on_step_complete", sink.on_step_complete(&step_outcome));

            if step_outcome.succeeded() {
                if let Some(key) = step.output_key() {
                    context.set_artifact(key, step_outcome.outcome.content.clone());
                }
            }
            context.append_log(format!(
                "{}: {} in {}ms after {} attempt(s)",
                step,
                if step_outcome.succeeded() { "succeeded" } else { "failed" },
                elapsed.as_millis(),
                retried.attempts
            ));

            if let Some(halt) = step_outcome.halt_reason(self.config.threshold) {
                tracing::warn!(
                    run_id = %run.run_id,
                    step = %step,
                    reason = %halt,
                    "Pipeline halted"
                );
                break;
            }
        }

        let summary = summarize(&run);
        notify("on_run_complete", sink.on_run_complete(&summary));
        tracing::info!(
            run_id = %run.run_id,
            steps = summary.total_steps,
            ready = summary.ready_for_next_phase,
            "Pipeline run finished"
        );

        Ok(PipelineResult {
            run,
            summary,
            final_context: context,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
