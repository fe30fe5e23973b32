//! Pipeline execution engine, retry wrapper, telemetry, and handoff.
//!
//! This crate implements the Blueprint pipeline runner: the fixed
//! parse → evaluate → generate → evaluate sequence, threshold gating,
//! per-attempt timeouts with bounded retry, telemetry sinks, the run summary,
//! and the post-run handoff.

pub mod capability;
pub mod engine;
pub mod events;
pub mod gate;
pub mod handoff;
pub mod record;
pub mod retry;
pub mod summary;
pub mod telemetry;
pub mod validation;

pub use capability::{
    Capability, CapabilityRegistry, CapabilityRequest, ORIGINAL_INPUT_KEY, REQUIREMENTS_KEY,
};
pub use engine::{PipelineEngine, PipelineResult};
pub use events::{EventEmitter, PipelineEvent};
pub use gate::{evaluate_gate, gate, GateDecision, GateVerdict};
pub use handoff::{manual_phases, Finding, FindingKind, Handoff, ManualPhase};
pub use record::{JsonRecordSink, SessionRecord, StepRecord};
pub use retry::{execute_with_retry, RetryOutcome};
pub use summary::{summarize, Summary};
pub use telemetry::{
    input_preview, truncate_chars, EventSink, MultiSink, NullSink, TelemetrySink, TracingSink,
};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
