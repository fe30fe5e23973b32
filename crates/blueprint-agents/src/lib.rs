//! LLM-backed capabilities for the Blueprint pipeline.
//!
//! Each capability renders a prompt template, sends it to an [`LlmBackend`],
//! and turns the reply into an [`Outcome`](blueprint_types::Outcome): a
//! description, a scored evaluation, or a multi-file artifact bundle.

pub mod artifact;
pub mod backend;
pub mod capabilities;
pub mod prompt;
pub mod score;
pub mod source;

use std::sync::Arc;

use blueprint_pipeline::CapabilityRegistry;
use blueprint_types::{CapabilityRole, StepKind};

pub use artifact::{parse_artifact, ArtifactBundle, ArtifactFile, DuplicateResource, FALLBACK_FILE};
pub use backend::{CannedBackend, CliBackend, CliProvider, LlmBackend};
pub use capabilities::{DescribeCapability, EvaluateCapability, GenerateCapability};
pub use prompt::{expand_variables, PromptSet, PromptTemplate};
pub use score::{extract_evaluation, extract_score, Evaluation, SCORE_KEYS};
pub use source::{load_input, referenced_file, InputSource};

/// Bind one capability per role, each on its own backend.
///
/// `backend_for` is called once per role in role order.
pub fn build_registry(
    mut backend_for: impl FnMut(CapabilityRole) -> Arc<dyn LlmBackend>,
    prompts: &PromptSet,
    threshold_hint: f64,
) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        DescribeCapability::new(backend_for(CapabilityRole::Parser))
            .with_template(prompts.get(StepKind::Parse).clone()),
    );
    registry.register(
        EvaluateCapability::new(backend_for(CapabilityRole::Evaluator))
            .with_description_template(prompts.get(StepKind::EvaluateParse).clone())
            .with_artifact_template(prompts.get(StepKind::EvaluateGenerate).clone())
            .with_threshold_hint(threshold_hint),
    );
    registry.register(
        GenerateCapability::new(backend_for(CapabilityRole::Generator))
            .with_template(prompts.get(StepKind::Generate).clone()),
    );
    registry
}

/// A registry whose backends return canned replies.
pub fn dry_run_registry(threshold_hint: f64) -> CapabilityRegistry {
    build_registry(
        |role| Arc::new(CannedBackend::dry_run_for(role)),
        &PromptSet::default(),
        threshold_hint,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_pipeline::{NullSink, PipelineEngine};
    use blueprint_types::PipelineConfig;

    #[test]
    fn build_registry_binds_every_role() {
        let registry = dry_run_registry(80.0);
        assert!(registry.missing_roles().is_empty());
        assert_eq!(registry.get(CapabilityRole::Evaluator).unwrap().name(), "evaluate");
    }

    #[tokio::test]
    async fn dry_run_pipeline_is_ready() {
        let engine =
            PipelineEngine::new(PipelineConfig::default(), dry_run_registry(80.0)).unwrap();
        let result = engine
            .run("A VPC with one public subnet", &mut NullSink)
            .await
            .unwrap();
        assert!(result.is_ready());
        assert_eq!(result.run.outcomes().len(), 4);
        let bundle = parse_artifact(
            result
                .final_context
                .artifact(blueprint_types::ContextKey::GeneratedArtifact)
                .unwrap(),
        );
        assert_eq!(bundle.paths(), vec!["main.tf"]);
    }
}
