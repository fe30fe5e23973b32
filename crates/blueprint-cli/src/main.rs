//! CLI binary for running the Blueprint pipeline.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use blueprint_agents::{
    build_registry, dry_run_registry, load_input, parse_artifact, CliBackend, CliProvider,
    LlmBackend, PromptSet,
};
use blueprint_pipeline::{
    validate, CapabilityRegistry, Handoff, JsonRecordSink, MultiSink, PipelineEngine,
    PipelineResult, Severity, TracingSink,
};
use blueprint_types::{CapabilityRole, ContextKey, PipelineConfig};

#[derive(Parser)]
#[command(name = "blueprint", version, about = "Gated describe, evaluate, generate pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    settings: Settings,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Pipeline and backend settings, each with an environment fallback.
#[derive(Args, Debug)]
struct Settings {
    /// Minimum evaluation score (0-100) required to continue
    #[arg(
        long,
        global = true,
        env = "EVALUATION_THRESHOLD",
        default_value_t = blueprint_types::DEFAULT_THRESHOLD
    )]
    threshold: f64,

    /// Attempts per step, including the first
    #[arg(
        long,
        global = true,
        env = "MAX_RETRIES",
        default_value_t = blueprint_types::DEFAULT_MAX_RETRIES
    )]
    max_retries: usize,

    /// Per-attempt timeout in seconds
    #[arg(
        long,
        global = true,
        env = "TIMEOUT_SECONDS",
        default_value_t = blueprint_types::DEFAULT_TIMEOUT.as_secs()
    )]
    timeout_seconds: u64,

    #[arg(long, global = true, env = "PARSER_PROVIDER")]
    parser_provider: Option<String>,
    #[arg(long, global = true, env = "PARSER_MODEL")]
    parser_model: Option<String>,

    #[arg(long, global = true, env = "EVALUATOR_PROVIDER")]
    evaluator_provider: Option<String>,
    #[arg(long, global = true, env = "EVALUATOR_MODEL")]
    evaluator_model: Option<String>,

    #[arg(long, global = true, env = "GENERATOR_PROVIDER")]
    generator_provider: Option<String>,
    #[arg(long, global = true, env = "GENERATOR_MODEL")]
    generator_model: Option<String>,

    /// Directory of prompt template overrides (<step>.txt)
    #[arg(long, global = true)]
    templates: Option<PathBuf>,

    /// Working directory for CLI backends
    #[arg(short, long, global = true)]
    workdir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on an input file ("-" reads stdin)
    Run {
        input: PathBuf,

        /// Write generated artifact files and run.json here when the run is ready
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Write a JSON session record into this directory
        #[arg(long)]
        record: Option<PathBuf>,

        /// Print the summary and handoff as JSON
        #[arg(long)]
        json: bool,

        /// Use canned backend replies instead of calling any LLM CLI
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the effective configuration and its diagnostics
    Config,

    /// List the files and duplicate resources in a generated artifact
    Inspect {
        /// File holding <file path="..."> blocks
        artifact: PathBuf,
    },
}

/// Provider and model configured for one role.
fn role_binding(settings: &Settings, role: CapabilityRole) -> (CliProvider, Option<&str>) {
    let (provider, model) = match role {
        CapabilityRole::Parser => (&settings.parser_provider, &settings.parser_model),
        CapabilityRole::Evaluator => (&settings.evaluator_provider, &settings.evaluator_model),
        CapabilityRole::Generator => (&settings.generator_provider, &settings.generator_model),
    };
    let provider = provider
        .as_deref()
        .map(CliProvider::from_name)
        .unwrap_or_else(|| CliProvider::default_for(role));
    (provider, model.as_deref())
}

fn pipeline_config(settings: &Settings) -> PipelineConfig {
    PipelineConfig::default()
        .with_threshold(settings.threshold)
        .with_max_retries(settings.max_retries)
        .with_timeout(Duration::from_secs(settings.timeout_seconds))
}

fn build_capabilities(settings: &Settings, dry_run: bool) -> anyhow::Result<CapabilityRegistry> {
    if dry_run {
        return Ok(dry_run_registry(settings.threshold));
    }
    let prompts = match &settings.templates {
        Some(dir) => PromptSet::from_dir(dir)?,
        None => PromptSet::default(),
    };
    Ok(build_registry(
        |role| {
            let (provider, model) = role_binding(settings, role);
            let mut backend = CliBackend::new(provider);
            if let Some(model) = model {
                backend = backend.with_model(model);
            }
            if let Some(dir) = &settings.workdir {
                backend = backend.with_workdir(dir);
            }
            Arc::new(backend) as Arc<dyn LlmBackend>
        },
        &prompts,
        settings.threshold,
    ))
}

fn bindings_json(settings: &Settings, dry_run: bool) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for role in CapabilityRole::ALL {
        let (provider, model) = role_binding(settings, role);
        let value = if dry_run {
            serde_json::json!({ "provider": "dry-run" })
        } else {
            serde_json::json!({
                "provider": provider.binary_name(),
                "model": model.unwrap_or("default"),
            })
        };
        map.insert(role.name().to_string(), value);
    }
    serde_json::Value::Object(map)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            input,
            out_dir,
            record,
            json,
            dry_run,
        } => {
            let ready = cmd_run(
                &cli.settings,
                &input,
                out_dir.as_deref(),
                record.as_deref(),
                json,
                dry_run,
            )
            .await?;
            if !ready {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            cmd_config(&cli.settings)?;
        }
        Commands::Inspect { artifact } => {
            cmd_inspect(&artifact)?;
        }
    }

    Ok(())
}

/// Initial input for a run. Text is read inline; diagram images and other
/// binary files are handed to the parser by absolute path.
fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    let source = load_input(path).with_context(|| format!("reading input {}", path.display()))?;
    if source.is_file() {
        tracing::info!(path = %path.display(), "Input is a diagram file, passing it by path");
    }
    Ok(source.into_initial_input())
}

async fn cmd_run(
    settings: &Settings,
    input_path: &Path,
    out_dir: Option<&Path>,
    record: Option<&Path>,
    json: bool,
    dry_run: bool,
) -> anyhow::Result<bool> {
    let input = read_input(input_path)?;
    let config = pipeline_config(settings);
    let registry = build_capabilities(settings, dry_run)?;
    let engine = PipelineEngine::new(config, registry)?;

    let mut sink = MultiSink::new().with(TracingSink);
    if let Some(dir) = record {
        sink.push(
            JsonRecordSink::new(dir)
                .with_config_entry("capabilities", bindings_json(settings, dry_run))
                .with_config_entry("input", serde_json::json!(input_path.display().to_string())),
        );
    }

    if !json {
        println!("Running pipeline on {}", input_path.display());
        if dry_run {
            println!("(dry run mode -- no LLM calls)");
        }
    }

    let result = engine.run(&input, &mut sink).await?;
    let handoff = Handoff::from_result(&result);

    if let Some(dir) = out_dir {
        write_outputs(dir, &result)?;
    }

    if json {
        let doc = serde_json::json!({
            "summary": result.summary,
            "handoff": handoff,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_report(&result, &handoff);
    }

    Ok(result.is_ready())
}

fn write_outputs(dir: &Path, result: &PipelineResult) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    if result.is_ready() {
        if let Some(artifact) = result.final_context.artifact(ContextKey::GeneratedArtifact) {
            let written = parse_artifact(artifact).write_to(dir)?;
            for path in &written {
                tracing::debug!(path = %path.display(), "Wrote artifact file");
            }
        }
    }
    let run_path = dir.join("run.json");
    std::fs::write(&run_path, serde_json::to_string_pretty(&result.run)?)?;
    tracing::info!(path = %run_path.display(), "Run written");
    Ok(())
}

fn print_report(result: &PipelineResult, handoff: &Handoff) {
    println!();
    for outcome in result.run.outcomes() {
        let status = if !outcome.succeeded() {
            "FAILED"
        } else if outcome.step.is_evaluation() && !outcome.gate_passed {
            "BELOW THRESHOLD"
        } else {
            "OK"
        };
        let score = outcome
            .score
            .map(|s| format!(" score={}", s))
            .unwrap_or_default();
        println!(
            "  [{}] {} ({:.1}s, {} attempt(s)){}",
            status,
            outcome.step.title(),
            outcome.elapsed.as_secs_f64(),
            outcome.attempts,
            score
        );
        if let Some(reason) = &outcome.outcome.failure_reason {
            println!("      {}", reason);
        }
    }

    let summary = &result.summary;
    println!();
    println!(
        "Steps: {}/{} ran, {} succeeded ({:.0}%)",
        summary.total_steps,
        summary.max_steps,
        summary.successful_steps,
        summary.success_rate()
    );
    println!("Total time: {:.1}s", summary.total_elapsed.as_secs_f64());
    println!("Threshold: {}", summary.threshold);
    if let Some(halt) = &summary.halt {
        println!("Halted: {}", halt);
    }

    match handoff {
        Handoff::Ready {
            artifact,
            next_phases,
            ..
        } => {
            let bundle = parse_artifact(artifact);
            println!("\nReady for the next phase. Generated files:");
            for path in bundle.paths() {
                println!("  {}", path);
            }
            for phase in next_phases {
                println!("\nPhase {}: {}", phase.number, phase.name);
                println!("  {}", phase.description);
                for (i, step) in phase.instructions.iter().enumerate() {
                    println!("  {}. {}", i + 1, step);
                }
            }
        }
        Handoff::NotReady {
            findings,
            recommendations,
            ..
        } => {
            println!("\nNot ready for the next phase.");
            for finding in findings {
                println!("  - {}: {}", finding.step.title(), finding.detail);
            }
            println!("\nRecommendations:");
            for rec in recommendations {
                println!("  - {}", rec);
            }
        }
    }
}

fn cmd_config(settings: &Settings) -> anyhow::Result<()> {
    let config = pipeline_config(settings);
    let registry = build_capabilities(settings, false)?;

    println!("{}", serde_json::to_string_pretty(&config)?);
    for role in CapabilityRole::ALL {
        let (provider, model) = role_binding(settings, role);
        println!(
            "{}: {} (model: {})",
            role,
            provider.display_name(),
            model.unwrap_or("default")
        );
    }

    let diagnostics = validate(&config, &registry);
    if diagnostics.is_empty() {
        println!("\nConfiguration is valid");
        return Ok(());
    }

    println!();
    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("    fix: {}", fix);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_inspect(path: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading artifact {}", path.display()))?;
    let bundle = parse_artifact(&source);
    if bundle.is_empty() {
        anyhow::bail!("{} contains no artifact files", path.display());
    }

    println!("Files: {}", bundle.len());
    for file in bundle.files() {
        println!("  {} ({} lines)", file.path, file.content.lines().count());
    }

    let duplicates = bundle.duplicate_resources();
    if duplicates.is_empty() {
        println!("\nNo duplicate resources");
    } else {
        println!("\nDuplicate resources:");
        for dup in &duplicates {
            println!("  {} in {}", dup.address, dup.files.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn run_flags_parse() {
        let cli = parse(&[
            "blueprint",
            "--threshold",
            "72.5",
            "run",
            "diagram.txt",
            "--dry-run",
            "--json",
            "--out-dir",
            "out",
        ]);
        assert_eq!(cli.settings.threshold, 72.5);
        match cli.command {
            Commands::Run {
                input,
                dry_run,
                json,
                out_dir,
                record,
            } => {
                assert_eq!(input, PathBuf::from("diagram.txt"));
                assert!(dry_run && json);
                assert_eq!(out_dir, Some(PathBuf::from("out")));
                assert!(record.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn role_binding_uses_defaults_and_overrides() {
        let cli = parse(&[
            "blueprint",
            "--evaluator-provider",
            "gemini",
            "--evaluator-model",
            "pro",
            "config",
        ]);
        assert_eq!(
            role_binding(&cli.settings, CapabilityRole::Evaluator),
            (CliProvider::Gemini, Some("pro"))
        );
        let mut settings = cli.settings;
        settings.generator_provider = None;
        settings.generator_model = None;
        assert_eq!(
            role_binding(&settings, CapabilityRole::Generator),
            (CliProvider::Claude, None)
        );
    }

    #[test]
    fn settings_map_onto_config() {
        let cli = parse(&[
            "blueprint",
            "--max-retries",
            "5",
            "--timeout-seconds",
            "30",
            "config",
        ]);
        let config = pipeline_config(&cli.settings);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn dry_run_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dry_run_registry(80.0);
        let engine = PipelineEngine::new(PipelineConfig::default(), registry).unwrap();
        let result = engine
            .run("vpc", &mut blueprint_pipeline::NullSink)
            .await
            .unwrap();
        write_outputs(dir.path(), &result).unwrap();
        assert!(dir.path().join("main.tf").is_file());
        let run: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("run.json")).unwrap())
                .unwrap();
        assert_eq!(run["outcomes"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn image_input_is_passed_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let diagram = dir.path().join("diagram.jpg");
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
        std::fs::write(&diagram, jpeg).unwrap();

        let input = read_input(&diagram).unwrap();
        assert_eq!(PathBuf::from(&input), std::fs::canonicalize(&diagram).unwrap());

        let notes = dir.path().join("arch.md");
        std::fs::write(&notes, "# VPC\ntwo subnets").unwrap();
        assert_eq!(read_input(&notes).unwrap(), "# VPC\ntwo subnets");
    }

    #[tokio::test]
    async fn dry_run_accepts_image_input() {
        let dir = tempfile::tempdir().unwrap();
        let diagram = dir.path().join("diagram.png");
        std::fs::write(&diagram, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]).unwrap();
        let out = dir.path().join("out");

        let cli = parse(&["blueprint", "config"]);
        let ready = cmd_run(&cli.settings, &diagram, Some(&out), None, true, true)
            .await
            .unwrap();
        assert!(ready);
        assert!(out.join("main.tf").is_file());
    }
}
