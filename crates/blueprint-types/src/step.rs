use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::ContextKey;

// ---------------------------------------------------------------------------
// StepKind: the four pipeline stages, in execution order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Parse,
    EvaluateParse,
    Generate,
    EvaluateGenerate,
}

impl StepKind {
    /// Every step in execution order.
    pub const ALL: [StepKind; 4] = [
        StepKind::Parse,
        StepKind::EvaluateParse,
        StepKind::Generate,
        StepKind::EvaluateGenerate,
    ];

    /// 1-based position in the pipeline.
    pub fn ordinal(self) -> usize {
        match self {
            StepKind::Parse => 1,
            StepKind::EvaluateParse => 2,
            StepKind::Generate => 3,
            StepKind::EvaluateGenerate => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StepKind::Parse => "parse",
            StepKind::EvaluateParse => "evaluate_parse",
            StepKind::Generate => "generate",
            StepKind::EvaluateGenerate => "evaluate_generate",
        }
    }

    /// Human-readable title, e.g. "Evaluate Parse".
    pub fn title(self) -> &'static str {
        match self {
            StepKind::Parse => "Parse",
            StepKind::EvaluateParse => "Evaluate Parse",
            StepKind::Generate => "Generate",
            StepKind::EvaluateGenerate => "Evaluate Generate",
        }
    }

    pub fn role(self) -> CapabilityRole {
        match self {
            StepKind::Parse => CapabilityRole::Parser,
            StepKind::EvaluateParse | StepKind::EvaluateGenerate => CapabilityRole::Evaluator,
            StepKind::Generate => CapabilityRole::Generator,
        }
    }

    /// Evaluation steps are threshold-gated and never write productive content.
    pub fn is_evaluation(self) -> bool {
        matches!(self, StepKind::EvaluateParse | StepKind::EvaluateGenerate)
    }

    /// Context slot a successful step writes its content into.
    pub fn output_key(self) -> Option<ContextKey> {
        match self {
            StepKind::Parse => Some(ContextKey::ParsedDescription),
            StepKind::Generate => Some(ContextKey::GeneratedArtifact),
            StepKind::EvaluateParse | StepKind::EvaluateGenerate => None,
        }
    }

    /// The step that follows this one, if any.
    pub fn next(self) -> Option<StepKind> {
        Self::ALL.get(self.ordinal()).copied()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// CapabilityRole: which kind of capability a step delegates to
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityRole {
    Parser,
    Evaluator,
    Generator,
}

impl CapabilityRole {
    pub const ALL: [CapabilityRole; 3] = [
        CapabilityRole::Parser,
        CapabilityRole::Evaluator,
        CapabilityRole::Generator,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CapabilityRole::Parser => "parser",
            CapabilityRole::Evaluator => "evaluator",
            CapabilityRole::Generator => "generator",
        }
    }
}

impl fmt::Display for CapabilityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// StepDescriptor: static metadata for one stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDescriptor {
    pub kind: StepKind,
    pub ordinal: usize,
    pub name: &'static str,
    pub role: CapabilityRole,
    pub gated: bool,
}

/// The fixed pipeline layout. Order is total; there is no dynamic reordering.
pub const PIPELINE_STEPS: [StepDescriptor; 4] = [
    StepDescriptor {
        kind: StepKind::Parse,
        ordinal: 1,
        name: "parse",
        role: CapabilityRole::Parser,
        gated: false,
    },
    StepDescriptor {
        kind: StepKind::EvaluateParse,
        ordinal: 2,
        name: "evaluate_parse",
        role: CapabilityRole::Evaluator,
        gated: true,
    },
    StepDescriptor {
        kind: StepKind::Generate,
        ordinal: 3,
        name: "generate",
        role: CapabilityRole::Generator,
        gated: false,
    },
    StepDescriptor {
        kind: StepKind::EvaluateGenerate,
        ordinal: 4,
        name: "evaluate_generate",
        role: CapabilityRole::Evaluator,
        gated: true,
    },
];

/// Look up the descriptor for a step.
pub fn descriptor(kind: StepKind) -> &'static StepDescriptor {
    &PIPELINE_STEPS[kind.ordinal() - 1]
}
