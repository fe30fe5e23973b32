//! Describe, evaluate, and generate capabilities backed by an [`LlmBackend`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use blueprint_pipeline::{Capability, CapabilityRequest, ORIGINAL_INPUT_KEY, REQUIREMENTS_KEY};
use blueprint_types::{BlueprintError, CapabilityRole, Outcome, Result, StepKind};

use crate::artifact::parse_artifact;
use crate::backend::LlmBackend;
use crate::prompt::{
    PromptTemplate, VAR_ARTIFACT, VAR_INPUT, VAR_ORIGINAL_INPUT, VAR_PARSED_DESCRIPTION,
    VAR_REQUIREMENTS,
};
use crate::score::extract_evaluation;
use crate::source::referenced_file;

/// How a payload that names a source file is presented to the model.
fn describe_source(payload: &str) -> String {
    match referenced_file(payload) {
        Some(path) => format!(
            "The architecture is the diagram image at {}. Open and read that file.",
            path.display()
        ),
        None => payload.to_string(),
    }
}

/// Template variables for one request.
///
/// `input` is always the payload. The context entries are copied through and
/// the payload is also exposed under the name of what it is for this step.
/// When the original input names a source file, `input` on the parse step and
/// `original_input` everywhere point the model at that file.
fn template_vars(request: &CapabilityRequest) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = request
        .context
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    vars.insert(VAR_INPUT.into(), request.payload.clone());
    if let Some(original) = request.context_value(ORIGINAL_INPUT_KEY) {
        vars.insert(VAR_ORIGINAL_INPUT.into(), describe_source(original));
    }
    match request.step {
        StepKind::Parse => {
            let source = describe_source(&request.payload);
            vars.insert(VAR_INPUT.into(), source.clone());
            vars.insert(VAR_ORIGINAL_INPUT.into(), source);
        }
        StepKind::EvaluateParse | StepKind::Generate => {
            vars.insert(VAR_PARSED_DESCRIPTION.into(), request.payload.clone());
        }
        StepKind::EvaluateGenerate => {
            vars.insert(VAR_ARTIFACT.into(), request.payload.clone());
            if let Some(requirements) = request.context_value(REQUIREMENTS_KEY) {
                vars.insert(VAR_REQUIREMENTS.into(), requirements.to_string());
                vars.insert(VAR_PARSED_DESCRIPTION.into(), requirements.to_string());
            }
        }
    }
    vars
}

fn ensure_step(capability: &str, request: &CapabilityRequest, allowed: &[StepKind]) -> Result<()> {
    if allowed.contains(&request.step) {
        Ok(())
    } else {
        Err(BlueprintError::CapabilityError {
            capability: capability.to_string(),
            message: format!("cannot handle step '{}'", request.step),
        })
    }
}

// ---------------------------------------------------------------------------
// DescribeCapability
// ---------------------------------------------------------------------------

/// Turns the raw input into a structured description.
pub struct DescribeCapability {
    backend: Arc<dyn LlmBackend>,
    template: PromptTemplate,
}

impl DescribeCapability {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            template: PromptTemplate::builtin(StepKind::Parse),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }
}

#[async_trait]
impl Capability for DescribeCapability {
    fn name(&self) -> &str {
        "describe"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::Parser
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<Outcome> {
        ensure_step(self.name(), request, &[StepKind::Parse])?;
        let prompt = self.template.render(&template_vars(request));
        let reply = self.backend.complete(&prompt).await?;
        let description = reply.trim();
        if description.is_empty() {
            return Ok(Outcome::fail(format!(
                "{} returned an empty description",
                self.backend.name()
            )));
        }
        Ok(Outcome::success(description).with_attribute("backend", json!(self.backend.name())))
    }
}

// ---------------------------------------------------------------------------
// EvaluateCapability
// ---------------------------------------------------------------------------

/// Scores a description or an artifact. The template is chosen by step.
pub struct EvaluateCapability {
    backend: Arc<dyn LlmBackend>,
    description_template: PromptTemplate,
    artifact_template: PromptTemplate,
    threshold_hint: Option<f64>,
}

impl EvaluateCapability {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            description_template: PromptTemplate::builtin(StepKind::EvaluateParse),
            artifact_template: PromptTemplate::builtin(StepKind::EvaluateGenerate),
            threshold_hint: None,
        }
    }

    pub fn with_description_template(mut self, template: PromptTemplate) -> Self {
        self.description_template = template;
        self
    }

    pub fn with_artifact_template(mut self, template: PromptTemplate) -> Self {
        self.artifact_template = template;
        self
    }

    /// Threshold reported alongside the score and exposed to templates as
    /// `${threshold}`. Informational only; the engine owns the gate.
    pub fn with_threshold_hint(mut self, threshold: f64) -> Self {
        self.threshold_hint = Some(threshold);
        self
    }

    fn template_for(&self, step: StepKind) -> &PromptTemplate {
        match step {
            StepKind::EvaluateGenerate => &self.artifact_template,
            _ => &self.description_template,
        }
    }
}

#[async_trait]
impl Capability for EvaluateCapability {
    fn name(&self) -> &str {
        "evaluate"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::Evaluator
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<Outcome> {
        ensure_step(
            self.name(),
            request,
            &[StepKind::EvaluateParse, StepKind::EvaluateGenerate],
        )?;

        let mut vars = template_vars(request);
        if let Some(threshold) = self.threshold_hint {
            vars.insert("threshold".into(), threshold.to_string());
        }
        let prompt = self.template_for(request.step).render(&vars);
        let reply = self.backend.complete(&prompt).await?;
        if reply.trim().is_empty() {
            return Ok(Outcome::fail(format!(
                "{} returned an empty evaluation",
                self.backend.name()
            )));
        }

        let evaluation = extract_evaluation(&reply);
        let mut outcome = Outcome::success(reply.trim())
            .with_attribute("task", json!(request.step.name()))
            .with_attribute("backend", json!(self.backend.name()));
        if let Some(body) = evaluation.body {
            outcome = outcome.with_attribute("evaluation", body);
        }
        if let Some(threshold) = self.threshold_hint {
            outcome = outcome.with_attribute("threshold_hint", json!(threshold));
        }
        match evaluation.score {
            Some(score) => {
                tracing::info!(step = %request.step, score, "Evaluation scored");
                outcome = outcome.with_score(score).with_confidence(score / 100.0);
            }
            None => {
                tracing::warn!(step = %request.step, "Evaluation reply carried no usable score");
            }
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// GenerateCapability
// ---------------------------------------------------------------------------

/// Produces a multi-file artifact bundle from the description.
pub struct GenerateCapability {
    backend: Arc<dyn LlmBackend>,
    template: PromptTemplate,
}

impl GenerateCapability {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            template: PromptTemplate::builtin(StepKind::Generate),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }
}

#[async_trait]
impl Capability for GenerateCapability {
    fn name(&self) -> &str {
        "generate"
    }

    fn role(&self) -> CapabilityRole {
        CapabilityRole::Generator
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<Outcome> {
        ensure_step(self.name(), request, &[StepKind::Generate])?;
        let prompt = self.template.render(&template_vars(request));
        let reply = self.backend.complete(&prompt).await?;

        let bundle = parse_artifact(&reply);
        if bundle.is_empty() {
            return Ok(Outcome::fail(format!(
                "{} produced no artifact files",
                self.backend.name()
            )));
        }

        let duplicates = bundle.duplicate_resources();
        for dup in &duplicates {
            tracing::warn!(
                resource = %dup.address,
                files = ?dup.files,
                "Resource declared more than once in generated artifact"
            );
        }

        Ok(Outcome::success(bundle.render())
            .with_attribute("file_count", json!(bundle.len()))
            .with_attribute("files", json!(bundle.paths()))
            .with_attribute("duplicate_resources", json!(duplicates))
            .with_attribute("backend", json!(self.backend.name())))
    }
}
