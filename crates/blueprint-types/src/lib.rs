//! Shared types, errors, context, and outcomes for the Blueprint pipeline engine.
//!
//! This crate provides the foundational types used across all other Blueprint crates:
//! - `BlueprintError`: unified error taxonomy
//! - `StepKind` / `StepDescriptor`: the fixed four-step pipeline layout
//! - `ExecutionContext`: per-run store of cross-step artifacts
//! - `Outcome` / `StepOutcome`: capability results and their engine-level wrapper
//! - `PipelineConfig` / `PipelineRun`: run inputs and the append-only run record

mod config;
mod context;
pub mod duration_serde;
mod error;
mod outcome;
mod run;
mod step;

pub use config::{
    BackoffPolicy, PipelineConfig, DEFAULT_MAX_RETRIES, DEFAULT_THRESHOLD, DEFAULT_TIMEOUT,
};
pub use context::{ContextKey, ExecutionContext};
pub use error::{BlueprintError, Result};
pub use outcome::{parse_score, Outcome, SCORE_ATTRIBUTE};
pub use run::{HaltReason, PipelineRun, StepOutcome};
pub use step::{descriptor, CapabilityRole, StepDescriptor, StepKind, PIPELINE_STEPS};
