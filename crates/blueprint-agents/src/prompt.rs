//! Prompt templates with `${variable}` expansion.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use blueprint_types::{BlueprintError, Result, StepKind};

/// Variable holding the request payload for the current step.
pub const VAR_INPUT: &str = "input";
pub const VAR_ORIGINAL_INPUT: &str = "original_input";
pub const VAR_PARSED_DESCRIPTION: &str = "parsed_description";
pub const VAR_REQUIREMENTS: &str = "requirements";
pub const VAR_ARTIFACT: &str = "artifact";

static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Expand `${variable}` patterns in a string.
///
/// Expansion is a single pass, so substituted values are never themselves
/// expanded. Variables that do not appear in `vars` are left as-is.
pub fn expand_variables(template: &str, vars: &HashMap<String, String>) -> String {
    VARIABLE_RE
        .replace_all(template, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Err(BlueprintError::InvalidConfig(format!(
                "prompt template {} is empty",
                path.display()
            )));
        }
        Ok(Self { text })
    }

    /// Minimal prompt used for `step` when no template is supplied.
    pub fn builtin(step: StepKind) -> Self {
        let text = match step {
            StepKind::Parse => BUILTIN_DESCRIBE,
            StepKind::EvaluateParse => BUILTIN_EVALUATE_DESCRIPTION,
            StepKind::Generate => BUILTIN_GENERATE,
            StepKind::EvaluateGenerate => BUILTIN_EVALUATE_ARTIFACT,
        };
        Self::new(text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names of the variables this template references, in first-use order.
    pub fn variables(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for caps in VARIABLE_RE.captures_iter(&self.text) {
            let name = caps[1].to_string();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    pub fn render(&self, vars: &HashMap<String, String>) -> String {
        expand_variables(&self.text, vars)
    }
}

/// One template per step, each either loaded or built in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    templates: [PromptTemplate; 4],
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            templates: StepKind::ALL.map(PromptTemplate::builtin),
        }
    }
}

impl PromptSet {
    /// File name looked up for a step's template, e.g. `evaluate_parse.txt`.
    pub fn file_name(step: StepKind) -> String {
        format!("{}.txt", step.name())
    }

    /// Load overrides from `dir`. Steps without a file keep the built-in template.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(BlueprintError::InvalidConfig(format!(
                "template directory {} does not exist",
                dir.display()
            )));
        }
        let mut set = Self::default();
        for step in StepKind::ALL {
            let path = dir.join(Self::file_name(step));
            if path.is_file() {
                tracing::debug!(step = %step, path = %path.display(), "Loaded prompt template");
                set.templates[step.ordinal() - 1] = PromptTemplate::from_file(&path)?;
            }
        }
        Ok(set)
    }

    pub fn get(&self, step: StepKind) -> &PromptTemplate {
        &self.templates[step.ordinal() - 1]
    }

    pub fn with(mut self, step: StepKind, template: PromptTemplate) -> Self {
        self.templates[step.ordinal() - 1] = template;
        self
    }
}

const BUILTIN_DESCRIBE: &str = "\
You are an infrastructure architect. Convert the following architecture \
input into a structured JSON description listing every component with its \
type, name, and key properties, plus the connections between components.

Respond with the JSON description only.

Input:
${input}
";

const BUILTIN_EVALUATE_DESCRIPTION: &str = "\
You are reviewing a structured infrastructure description for accuracy and \
completeness against the original input it was derived from.

Original input:
${original_input}

Description to evaluate:
${input}

Respond with a JSON object: {\"overall_score\": <0-100>, \"feedback\": \"...\"}
";

const BUILTIN_GENERATE: &str = "\
You are an infrastructure engineer. Generate Terraform code implementing the \
following description. Emit each file as a block of the form

<file path=\"main.tf\">
...contents...
</file>

Declare every resource exactly once across all files.

Description:
${input}
";

const BUILTIN_EVALUATE_ARTIFACT: &str = "\
You are reviewing generated Terraform code against its requirements. Check \
correctness, completeness, security, and best practices.

Requirements:
${requirements}

Code to evaluate:
${input}

Respond with a JSON object: {\"overall_score\": <0-100>, \"feedback\": \"...\"}
";
