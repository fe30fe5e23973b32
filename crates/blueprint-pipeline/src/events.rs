//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, progress displays, recorders) can follow a
//! run without coupling to the engine internals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blueprint_types::StepKind;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        threshold: f64,
    },
    StepStarted {
        step: StepKind,
        input_preview: String,
    },
    StepCompleted {
        step: StepKind,
        duration_ms: u64,
        attempts: usize,
        content_chars: usize,
    },
    StepFailed {
        step: StepKind,
        reason: String,
        attempts: usize,
    },
    GateChecked {
        step: StepKind,
        score: Option<f64>,
        threshold: f64,
        passed: bool,
    },
    RunCompleted {
        run_id: Uuid,
        total_steps: usize,
        duration_ms: u64,
    },
    RunHalted {
        run_id: Uuid,
        step: StepKind,
        reason: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(64)
    }
}
