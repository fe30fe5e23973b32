//! Text-completion backends that capabilities delegate to.

use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use blueprint_types::{BlueprintError, CapabilityRole, Result};

// ---------------------------------------------------------------------------
// LlmBackend trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short identifier used in logs and outcome attributes.
    fn name(&self) -> &str;

    /// Send `prompt` and return the model's reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// CliProvider: which CLI tool to invoke
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliProvider {
    Claude,
    Codex,
    Gemini,
}

impl std::str::FromStr for CliProvider {
    type Err = (); // Unknown names fall back to Claude

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "codex" | "openai" | "gpt4" | "gpt-4o" => Ok(Self::Codex),
            "gemini" | "google" => Ok(Self::Gemini),
            other => {
                tracing::warn!(provider = other, "Unknown provider, defaulting to Claude");
                Ok(Self::Claude)
            }
        }
    }
}

impl CliProvider {
    /// Parse a provider name, falling back to Claude.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(Self::Claude)
    }

    /// Provider used for a role when none is configured: Gemini describes,
    /// Codex evaluates, Claude generates.
    pub fn default_for(role: CapabilityRole) -> Self {
        match role {
            CapabilityRole::Parser => Self::Gemini,
            CapabilityRole::Evaluator => Self::Codex,
            CapabilityRole::Generator => Self::Claude,
        }
    }

    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::Codex => "Codex CLI",
            Self::Gemini => "Gemini CLI",
        }
    }
}

// ---------------------------------------------------------------------------
// CLI output structs
// ---------------------------------------------------------------------------

/// Result shape from `claude -p --output-format json`
#[derive(serde::Deserialize)]
struct ClaudeOutput {
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    subtype: String,
}

/// Codex JSONL event.
#[derive(serde::Deserialize)]
#[serde(tag = "type")]
enum CodexEvent {
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: Option<CodexError> },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(other)]
    Other,
}

#[derive(serde::Deserialize)]
struct CodexItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(serde::Deserialize)]
struct CodexError {
    message: String,
}

/// Gemini JSON output (single object).
#[derive(serde::Deserialize)]
struct GeminiOutput {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(serde::Deserialize)]
struct GeminiError {
    message: String,
}

/// Normalized reply from any CLI provider.
#[derive(Debug, PartialEq)]
struct CliReply {
    text: String,
    is_error: bool,
}

fn snippet(s: &str) -> &str {
    match s.char_indices().nth(500) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn provider_error(provider: CliProvider, message: String) -> BlueprintError {
    BlueprintError::ProviderError {
        provider: provider.binary_name().into(),
        message,
        retryable: true,
    }
}

const RATE_LIMIT_MARKERS: [&str; 6] = [
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "429",
    "quota",
];

const AUTH_MARKERS: [&str; 7] = [
    "401",
    "unauthorized",
    "authentication",
    "invalid api key",
    "invalid_api_key",
    "not logged in",
    "please log in",
];

static RETRY_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)retry[ _-]?after\D{0,3}(\d+)\s*(ms|milliseconds?)?").expect("valid regex")
});

/// Map a failure message from a provider CLI onto the error taxonomy.
///
/// Auth failures are terminal, rate limits carry the advertised delay when
/// the message names one, and anything else is a retryable provider error.
fn classify_failure(provider: CliProvider, message: String) -> BlueprintError {
    let lower = message.to_lowercase();
    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        return BlueprintError::AuthError {
            provider: provider.binary_name().into(),
        };
    }
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        let retry_after_ms = RETRY_AFTER_RE
            .captures(&message)
            .and_then(|caps| {
                let value: u64 = caps[1].parse().ok()?;
                Some(if caps.get(2).is_some() {
                    value
                } else {
                    value.saturating_mul(1000)
                })
            })
            .unwrap_or(0);
        return BlueprintError::RateLimited {
            provider: provider.binary_name().into(),
            retry_after_ms,
        };
    }
    provider_error(provider, message)
}

// ---------------------------------------------------------------------------
// CLI command builder
// ---------------------------------------------------------------------------

fn build_cli_command(
    provider: CliProvider,
    prompt: &str,
    model: Option<&str>,
    workdir: Option<&std::path::Path>,
) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(provider.binary_name());
    match provider {
        CliProvider::Claude => {
            cmd.arg("-p")
                .arg(prompt)
                .arg("--output-format")
                .arg("json")
                .arg("--no-session-persistence");
            if let Some(model) = model {
                cmd.arg("--model").arg(model);
            }
        }
        CliProvider::Codex => {
            cmd.arg("exec")
                .arg("--json")
                .arg("--skip-git-repo-check")
                .arg("--ephemeral");
            if let Some(model) = model {
                cmd.arg("--model").arg(model);
            }
            // Prompt is positional and must come last
            cmd.arg(prompt);
        }
        CliProvider::Gemini => {
            cmd.arg("--output-format").arg("json");
            if let Some(model) = model {
                cmd.arg("--model").arg(model);
            }
            cmd.arg(prompt);
        }
    }

    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    // The engine's per-attempt timeout drops this future; take the child with it.
    cmd.kill_on_drop(true);
    cmd
}

// ---------------------------------------------------------------------------
// CLI output parsers
// ---------------------------------------------------------------------------

fn parse_cli_output(provider: CliProvider, stdout: &str, stderr: &str) -> Result<CliReply> {
    if stdout.trim().is_empty() {
        return Err(provider_error(
            provider,
            format!(
                "{} produced no output. stderr: {}",
                provider.display_name(),
                snippet(stderr)
            ),
        ));
    }

    match provider {
        CliProvider::Claude => parse_claude_output(stdout),
        CliProvider::Codex => Ok(parse_codex_output(stdout)),
        CliProvider::Gemini => parse_gemini_output(stdout),
    }
}

fn parse_claude_output(stdout: &str) -> Result<CliReply> {
    let parsed: ClaudeOutput = serde_json::from_str(stdout).map_err(|e| {
        provider_error(
            CliProvider::Claude,
            format!("failed to parse output: {} (raw: {})", e, snippet(stdout)),
        )
    })?;
    Ok(CliReply {
        text: parsed.result,
        is_error: parsed.is_error || parsed.subtype == "error",
    })
}

fn parse_codex_output(stdout: &str) -> CliReply {
    let mut last_message: Option<String> = None;
    let mut is_error = false;
    let mut error_message: Option<String> = None;

    for event in serde_json::Deserializer::from_str(stdout).into_iter::<CodexEvent>() {
        match event {
            Ok(CodexEvent::ItemCompleted { item }) => {
                if item.item_type == "agent_message" {
                    if let Some(text) = item.text {
                        last_message = Some(text);
                    }
                }
            }
            Ok(CodexEvent::TurnFailed { error }) => {
                is_error = true;
                error_message = error.map(|e| e.message);
            }
            Ok(CodexEvent::Error { message }) => {
                is_error = true;
                error_message = Some(message);
            }
            Ok(CodexEvent::Other) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed Codex JSONL event");
            }
        }
    }

    // A failure message wins over any partial agent message
    let text = if is_error {
        error_message.or(last_message)
    } else {
        last_message
    }
    .unwrap_or_else(|| "No agent message found in Codex output".into());

    CliReply { text, is_error }
}

fn parse_gemini_output(stdout: &str) -> Result<CliReply> {
    let parsed: GeminiOutput = serde_json::from_str(stdout).map_err(|e| {
        provider_error(
            CliProvider::Gemini,
            format!("failed to parse output: {} (raw: {})", e, snippet(stdout)),
        )
    })?;

    if let Some(err) = parsed.error {
        return Ok(CliReply {
            text: err.message,
            is_error: true,
        });
    }

    Ok(CliReply {
        text: parsed.response.unwrap_or_default(),
        is_error: false,
    })
}

// ---------------------------------------------------------------------------
// CliBackend: shells out to an LLM CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CliBackend {
    provider: CliProvider,
    model: Option<String>,
    workdir: Option<PathBuf>,
}

impl CliBackend {
    pub fn new(provider: CliProvider) -> Self {
        Self {
            provider,
            model: None,
            workdir: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn provider(&self) -> CliProvider {
        self.provider
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

#[async_trait]
impl LlmBackend for CliBackend {
    fn name(&self) -> &str {
        self.provider.binary_name()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let provider = self.provider;
        tracing::debug!(
            provider = provider.display_name(),
            model = self.model.as_deref().unwrap_or("default"),
            prompt_chars = prompt.chars().count(),
            "Invoking CLI backend"
        );

        let mut cmd = build_cli_command(
            provider,
            prompt,
            self.model.as_deref(),
            self.workdir.as_deref(),
        );

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlueprintError::BackendUnavailable {
                    binary: provider.binary_name().to_string(),
                }
            } else {
                BlueprintError::Transport {
                    provider: provider.binary_name().into(),
                    message: format!("failed to spawn {}: {}", provider.display_name(), e),
                }
            }
        })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BlueprintError::Transport {
                provider: provider.binary_name().into(),
                message: format!("{} execution failed: {}", provider.display_name(), e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() && stdout.trim().is_empty() {
            return Err(classify_failure(
                provider,
                format!(
                    "{} exited with {}: {}",
                    provider.display_name(),
                    output.status,
                    snippet(stderr.trim())
                ),
            ));
        }

        let reply = parse_cli_output(provider, &stdout, &stderr)?;
        tracing::info!(
            provider = provider.display_name(),
            is_error = reply.is_error,
            reply_chars = reply.text.chars().count(),
            "CLI backend completed"
        );

        if reply.is_error {
            return Err(classify_failure(provider, reply.text));
        }
        Ok(reply.text)
    }
}

// ---------------------------------------------------------------------------
// CannedBackend: fixed reply, no external process
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CannedBackend {
    name: String,
    response: String,
}

impl CannedBackend {
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: response.into(),
        }
    }

    /// A plausible reply for each role, used for dry runs.
    pub fn dry_run_for(role: CapabilityRole) -> Self {
        let response = match role {
            CapabilityRole::Parser => concat!(
                r#"{"components": ["#,
                r#"{"type": "vpc", "name": "main", "cidr": "10.0.0.0/16"}, "#,
                r#"{"type": "subnet", "name": "public", "cidr": "10.0.1.0/24"}], "#,
                r#""connections": [["public", "main"]]}"#
            ),
            CapabilityRole::Evaluator => {
                r#"{"overall_score": 100, "feedback": "Dry run: no evaluation performed."}"#
            }
            CapabilityRole::Generator => concat!(
                "<file path=\"main.tf\">\n",
                "resource \"aws_vpc\" \"main\" {\n  cidr_block = \"10.0.0.0/16\"\n}\n\n",
                "resource \"aws_subnet\" \"public\" {\n",
                "  vpc_id     = aws_vpc.main.id\n  cidr_block = \"10.0.1.0/24\"\n}\n",
                "</file>\n"
            ),
        };
        Self::new(format!("dry-run-{}", role), response)
    }
}

#[async_trait]
impl LlmBackend for CannedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- CliProvider ---

    #[test]
    fn provider_from_str_variants() {
        assert_eq!(CliProvider::from_name("claude"), CliProvider::Claude);
        assert_eq!(CliProvider::from_name("Anthropic"), CliProvider::Claude);
        assert_eq!(CliProvider::from_name("openai"), CliProvider::Codex);
        assert_eq!(CliProvider::from_name("GEMINI"), CliProvider::Gemini);
        assert_eq!(CliProvider::from_name("google"), CliProvider::Gemini);
    }

    #[test]
    fn provider_unknown_defaults_to_claude() {
        assert_eq!("llama".parse::<CliProvider>(), Ok(CliProvider::Claude));
    }

    #[test]
    fn provider_defaults_per_role() {
        assert_eq!(CliProvider::default_for(CapabilityRole::Parser), CliProvider::Gemini);
        assert_eq!(CliProvider::default_for(CapabilityRole::Evaluator), CliProvider::Codex);
        assert_eq!(CliProvider::default_for(CapabilityRole::Generator), CliProvider::Claude);
    }

    // --- Output parsers ---

    #[test]
    fn parse_claude_output_success() {
        let json = concat!(
            r#"{"result":"Hello world","is_error":false,"subtype":"","#,
            r#""total_cost_usd":0.05,"num_turns":3}"#
        );
        let reply = parse_claude_output(json).unwrap();
        assert_eq!(reply.text, "Hello world");
        assert!(!reply.is_error);
    }

    #[test]
    fn parse_claude_output_error_subtype() {
        let json = r#"{"result":"Something failed","subtype":"error"}"#;
        assert!(parse_claude_output(json).unwrap().is_error);
    }

    #[test]
    fn parse_claude_output_invalid_json_is_retryable() {
        let err = parse_claude_output("not json").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn parse_codex_output_extracts_last_message() {
        let jsonl = concat!(
            r#"{"type":"thread.started"}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"First"}}"#,
            "\n",
            r#"{"type":"item.completed","item":{"type":"agent_message","#,
            r#""text":"{\"overall_score\": 88}"}}"#,
            "\n",
            r#"{"type":"turn.completed","usage":{"input_tokens":100,"output_tokens":50}}"#,
        );
        let reply = parse_codex_output(jsonl);
        assert_eq!(reply.text, r#"{"overall_score": 88}"#);
        assert!(!reply.is_error);
    }

    #[test]
    fn parse_codex_output_prefers_failure_message() {
        let jsonl = concat!(
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"partial"}}"#,
            "\n",
            r#"{"type":"turn.failed","error":{"message":"Rate limited"}}"#,
        );
        let reply = parse_codex_output(jsonl);
        assert!(reply.is_error);
        assert_eq!(reply.text, "Rate limited");
    }

    #[test]
    fn parse_gemini_output_success_and_error() {
        let ok =
            parse_gemini_output(r#"{"session_id":"abc","response":"Gemini says hi"}"#).unwrap();
        assert_eq!(ok.text, "Gemini says hi");
        assert!(!ok.is_error);

        let err = parse_gemini_output(
            r#"{"error":{"type":"api_error","message":"Model not found","code":404}}"#,
        )
        .unwrap();
        assert!(err.is_error);
        assert_eq!(err.text, "Model not found");
    }

    #[test]
    fn parse_cli_output_empty_stdout_errors() {
        let err = parse_cli_output(CliProvider::Gemini, "  ", "quota exceeded").unwrap_err();
        assert!(err.to_string().contains("produced no output"));
        assert!(err.to_string().contains("quota exceeded"));
    }

    // --- build_cli_command ---

    fn args(cmd: &tokio::process::Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn build_cli_command_claude_has_json_output() {
        let cmd = build_cli_command(CliProvider::Claude, "describe this", Some("sonnet"), None);
        let args = args(&cmd);
        assert_eq!(cmd.as_std().get_program(), "claude");
        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"json".to_string()));
        assert!(args.contains(&"sonnet".to_string()));
    }

    #[test]
    fn build_cli_command_prompt_is_positional_for_codex_and_gemini() {
        for provider in [CliProvider::Codex, CliProvider::Gemini] {
            let cmd = build_cli_command(provider, "evaluate this", None, None);
            assert_eq!(args(&cmd).last().map(String::as_str), Some("evaluate this"));
        }
    }

    #[test]
    fn build_cli_command_sets_workdir() {
        let cmd = build_cli_command(
            CliProvider::Gemini,
            "p",
            None,
            Some(std::path::Path::new("/tmp")),
        );
        assert_eq!(cmd.as_std().get_current_dir(), Some(std::path::Path::new("/tmp")));
    }

    // --- Backends ---

    #[tokio::test]
    async fn missing_binary_is_backend_unavailable() {
        // No provider binary is expected under this name
        let backend =
            CliBackend::new(CliProvider::Claude).with_workdir("/nonexistent-blueprint-dir");
        let err = backend.complete("hello").await.unwrap_err();
        assert!(
            matches!(
                err,
                BlueprintError::BackendUnavailable { .. } | BlueprintError::Transport { .. }
            ),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn canned_backend_returns_fixed_reply() {
        let backend = CannedBackend::dry_run_for(CapabilityRole::Evaluator);
        assert_eq!(backend.name(), "dry-run-evaluator");
        let reply = backend.complete("anything").await.unwrap();
        assert!(reply.contains("overall_score"));
    }

    // --- Failure classification ---

    #[test]
    fn rate_limit_message_carries_retry_after() {
        let err = classify_failure(
            CliProvider::Claude,
            "API error 429: rate limit exceeded, retry after 30 seconds".into(),
        );
        assert!(matches!(
            err,
            BlueprintError::RateLimited { ref provider, retry_after_ms: 30_000 }
                if provider == "claude"
        ));
        assert!(err.is_retryable());

        let err = classify_failure(
            CliProvider::Codex,
            "Too Many Requests; Retry-After: 250ms".into(),
        );
        assert!(matches!(err, BlueprintError::RateLimited { retry_after_ms: 250, .. }));

        let err = classify_failure(CliProvider::Gemini, "quota exhausted for today".into());
        assert!(matches!(err, BlueprintError::RateLimited { retry_after_ms: 0, .. }));
    }

    #[test]
    fn auth_message_is_terminal() {
        let err = classify_failure(
            CliProvider::Gemini,
            "Gemini CLI exited with exit status: 1: 401 Unauthorized".into(),
        );
        assert!(matches!(err, BlueprintError::AuthError { ref provider } if provider == "gemini"));
        assert!(err.is_terminal());
        assert!(!err.is_retryable());

        let err = classify_failure(
            CliProvider::Claude,
            "Invalid API key · Please run /login".into(),
        );
        assert!(err.is_terminal());
    }

    #[test]
    fn other_failures_stay_retryable_provider_errors() {
        let err = classify_failure(CliProvider::Codex, "model overloaded".into());
        assert!(matches!(
            err,
            BlueprintError::ProviderError { retryable: true, .. }
        ));
        assert!(!err.is_terminal());
    }
}
