//! Write-only telemetry collaborators handed to each run.

use uuid::Uuid;

use blueprint_types::{PipelineConfig, Result, StepKind, StepOutcome};

use crate::events::{EventEmitter, PipelineEvent};
use crate::summary::Summary;

/// Characters of step input forwarded to `on_step_start`.
pub const INPUT_PREVIEW_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// TelemetrySink trait
// ---------------------------------------------------------------------------

/// Receives per-step and per-run notifications.
///
/// Errors returned from any hook are logged by the engine and never abort
/// the run.
pub trait TelemetrySink: Send {
    fn on_run_start(&mut self, _run_id: Uuid, _config: &PipelineConfig) -> Result<()> {
        Ok(())
    }

    fn on_step_start(&mut self, step: StepKind, input_preview: &str) -> Result<()>;

    fn on_step_complete(&mut self, outcome: &StepOutcome) -> Result<()>;

    fn on_run_complete(&mut self, summary: &Summary) -> Result<()>;
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn input_preview(input: &str) -> &str {
    truncate_chars(input, INPUT_PREVIEW_CHARS)
}

// ---------------------------------------------------------------------------
// NullSink
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn on_step_start(&mut self, _step: StepKind, _input_preview: &str) -> Result<()> {
        Ok(())
    }

    fn on_step_complete(&mut self, _outcome: &StepOutcome) -> Result<()> {
        Ok(())
    }

    fn on_run_complete(&mut self, _summary: &Summary) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TracingSink: renders telemetry as structured tracing events
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn on_run_start(&mut self, run_id: Uuid, config: &PipelineConfig) -> Result<()> {
        tracing::info!(
            run_id = %run_id,
            threshold = config.threshold,
            max_retries = config.max_retries,
            timeout_ms = %config.timeout.as_millis(),
            "Pipeline run started"
        );
        Ok(())
    }

    fn on_step_start(&mut self, step: StepKind, input_preview: &str) -> Result<()> {
        tracing::info!(
            step = %step,
            ordinal = step.ordinal(),
            preview = %input_preview,
            "Step started"
        );
        Ok(())
    }

    fn on_step_complete(&mut self, outcome: &StepOutcome) -> Result<()> {
        let elapsed_ms = outcome.elapsed.as_millis();
        if outcome.succeeded() {
            tracing::info!(
                step = %outcome.step,
                elapsed_ms = %elapsed_ms,
                attempts = outcome.attempts,
                score = ?outcome.score,
                gate_passed = outcome.gate_passed,
                "Step completed"
            );
        } else {
            tracing::warn!(
                step = %outcome.step,
                elapsed_ms = %elapsed_ms,
                attempts = outcome.attempts,
                reason = outcome.outcome.failure_reason.as_deref().unwrap_or_default(),
                "Step failed"
            );
        }
        Ok(())
    }

    fn on_run_complete(&mut self, summary: &Summary) -> Result<()> {
        match &summary.halt {
            None => tracing::info!(
                run_id = %summary.run_id,
                steps = summary.total_steps,
                elapsed_ms = %summary.total_elapsed.as_millis(),
                ready = summary.ready_for_next_phase,
                "Pipeline run completed"
            ),
            Some(halt) => tracing::warn!(
                run_id = %summary.run_id,
                steps = summary.total_steps,
                elapsed_ms = %summary.total_elapsed.as_millis(),
                halt = %halt,
                "Pipeline run halted"
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EventSink: forwards telemetry onto a broadcast channel
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct EventSink {
    emitter: EventEmitter,
    run_id: Option<Uuid>,
    threshold: f64,
}

impl EventSink {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            emitter,
            run_id: None,
            threshold: blueprint_types::DEFAULT_THRESHOLD,
        }
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }
}

impl TelemetrySink for EventSink {
    fn on_run_start(&mut self, run_id: Uuid, config: &PipelineConfig) -> Result<()> {
        self.run_id = Some(run_id);
        self.threshold = config.threshold;
        self.emitter.emit(PipelineEvent::RunStarted {
            run_id,
            threshold: config.threshold,
        });
        Ok(())
    }

    fn on_step_start(&mut self, step: StepKind, input_preview: &str) -> Result<()> {
        self.emitter.emit(PipelineEvent::StepStarted {
            step,
            input_preview: input_preview.to_string(),
        });
        Ok(())
    }

    fn on_step_complete(&mut self, outcome: &StepOutcome) -> Result<()> {
        if outcome.succeeded() {
            self.emitter.emit(PipelineEvent::StepCompleted {
                step: outcome.step,
                duration_ms: outcome.elapsed.as_millis() as u64,
                attempts: outcome.attempts,
                content_chars: outcome.outcome.content.chars().count(),
            });
            if outcome.step.is_evaluation() {
                self.emitter.emit(PipelineEvent::GateChecked {
                    step: outcome.step,
                    score: outcome.score,
                    threshold: self.threshold,
                    passed: outcome.gate_passed,
                });
            }
        } else {
            self.emitter.emit(PipelineEvent::StepFailed {
                step: outcome.step,
                reason: outcome.outcome.failure_reason.clone().unwrap_or_default(),
                attempts: outcome.attempts,
            });
        }
        Ok(())
    }

    fn on_run_complete(&mut self, summary: &Summary) -> Result<()> {
        let event = match &summary.halt {
            None => PipelineEvent::RunCompleted {
                run_id: summary.run_id,
                total_steps: summary.total_steps,
                duration_ms: summary.total_elapsed.as_millis() as u64,
            },
            Some(halt) => PipelineEvent::RunHalted {
                run_id: summary.run_id,
                step: halt.step(),
                reason: halt.to_string(),
            },
        };
        self.emitter.emit(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MultiSink: fan-out to several sinks
// ---------------------------------------------------------------------------

/// Forwards every hook to each inner sink in order. A failing sink does not
/// stop the others; the first error is returned after all have run.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.push(sink);
        self
    }

    pub fn push(&mut self, sink: impl TelemetrySink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut dyn TelemetrySink) -> Result<()>,
    {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = f(sink.as_mut()) {
                tracing::warn!(error = %e, "Telemetry sink failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl TelemetrySink for MultiSink {
    fn on_run_start(&mut self, run_id: Uuid, config: &PipelineConfig) -> Result<()> {
        self.each(|s| s.on_run_start(run_id, config))
    }

    fn on_step_start(&mut self, step: StepKind, input_preview: &str) -> Result<()> {
        self.each(|s| s.on_step_start(step, input_preview))
    }

    fn on_step_complete(&mut self, outcome: &StepOutcome) -> Result<()> {
        self.each(|s| s.on_step_complete(outcome))
    }

    fn on_run_complete(&mut self, summary: &Summary) -> Result<()> {
        self.each(|s| s.on_run_complete(summary))
    }
}
