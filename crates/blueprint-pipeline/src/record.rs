//! JSON session record written at the end of a run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blueprint_types::{PipelineConfig, Result, StepKind, StepOutcome};

use crate::summary::Summary;
use crate::telemetry::{truncate_chars, TelemetrySink};

/// Step content beyond this many characters is cut in the record.
pub const RECORD_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub run_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub configuration: serde_json::Value,
    pub steps: Vec<StepRecord>,
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_number: usize,
    pub step: StepKind,
    pub success: bool,
    pub elapsed_ms: u64,
    pub attempts: usize,
    pub score: Option<f64>,
    pub passed_threshold: bool,
    pub content: String,
    pub content_truncated: bool,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    fn from_outcome(outcome: &StepOutcome) -> Self {
        let content = &outcome.outcome.content;
        let cut = truncate_chars(content, RECORD_CONTENT_CHARS);
        let content_truncated = cut.len() < content.len();
        let content = if content_truncated {
            format!("{cut}...")
        } else {
            cut.to_string()
        };
        Self {
            step_number: outcome.step.ordinal(),
            step: outcome.step,
            success: outcome.succeeded(),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            attempts: outcome.attempts,
            score: outcome.score,
            passed_threshold: outcome.gate_passed,
            content,
            content_truncated,
            attributes: outcome
                .outcome
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            error_message: outcome.outcome.failure_reason.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Drop any configuration key that looks like a credential.
fn redact(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(k, _)| !k.to_lowercase().contains("api_key"))
                .map(|(k, v)| (k, redact(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Telemetry sink that accumulates a [`SessionRecord`] and writes it to
/// `<dir>/session_<timestamp>_<run_id>.json` when the run completes. The run
/// id keeps runs started within the same second from overwriting each other.
pub struct JsonRecordSink {
    dir: PathBuf,
    record: SessionRecord,
    extra_config: serde_json::Map<String, serde_json::Value>,
    written: Option<PathBuf>,
}

impl JsonRecordSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let start_time = Utc::now();
        Self {
            dir: dir.into(),
            record: SessionRecord {
                session_id: start_time.format("%Y%m%d_%H%M%S").to_string(),
                run_id: None,
                start_time,
                end_time: None,
                configuration: serde_json::Value::Null,
                steps: Vec::new(),
                summary: None,
            },
            extra_config: serde_json::Map::new(),
            written: None,
        }
    }

    /// Attach additional configuration (e.g. capability bindings) to the
    /// record. Keys containing `api_key` are dropped.
    pub fn with_config_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_config.insert(key.into(), value);
        self
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Path of the written record, once the run has completed.
    pub fn written_path(&self) -> Option<&Path> {
        self.written.as_deref()
    }

    fn file_path(&self) -> PathBuf {
        let name = match self.record.run_id {
            Some(run_id) => format!("session_{}_{}.json", self.record.session_id, run_id),
            None => format!("session_{}.json", self.record.session_id),
        };
        self.dir.join(name)
    }
}

impl TelemetrySink for JsonRecordSink {
    fn on_run_start(&mut self, run_id: Uuid, config: &PipelineConfig) -> Result<()> {
        let mut configuration = match serde_json::to_value(config)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        configuration.extend(self.extra_config.clone());
        self.record.run_id = Some(run_id);
        self.record.configuration = redact(serde_json::Value::Object(configuration));
        Ok(())
    }

    fn on_step_start(&mut self, _step: StepKind, _input_preview: &str) -> Result<()> {
        Ok(())
    }

    fn on_step_complete(&mut self, outcome: &StepOutcome) -> Result<()> {
        self.record.steps.push(StepRecord::from_outcome(outcome));
        Ok(())
    }

    fn on_run_complete(&mut self, summary: &Summary) -> Result<()> {
        self.record.summary = Some(summary.clone());
        self.record.end_time = Some(Utc::now());

        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_path();
        let json = serde_json::to_string_pretty(&self.record)?;
        std::fs::write(&path, json)?;
        tracing::info!(path = %path.display(), "Session record written");
        self.written = Some(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::summarize;
    use blueprint_types::{Outcome, PipelineRun};
    use std::time::Duration;

    fn outcome(step: StepKind, content: &str) -> StepOutcome {
        StepOutcome {
            step,
            outcome: Outcome::success(content),
            score: None,
            gate_passed: false,
            elapsed: Duration::from_millis(40),
            attempts: 1,
        }
    }

    #[test]
    fn long_content_is_truncated() {
        let record = StepRecord::from_outcome(&outcome(StepKind::Generate, &"a".repeat(2500)));
        assert!(record.content_truncated);
        assert_eq!(record.content.len(), RECORD_CONTENT_CHARS + 3);
        assert!(record.content.ends_with("..."));

        let short = StepRecord::from_outcome(&outcome(StepKind::Parse, "vpc"));
        assert!(!short.content_truncated);
        assert_eq!(short.content, "vpc");
        assert_eq!(short.step_number, 1);
    }

    #[test]
    fn redact_drops_api_keys_recursively() {
        let value = serde_json::json!({
            "threshold": 80,
            "OPENAI_API_KEY": "secret",
            "providers": { "gemini_api_key": "secret", "model": "gemini" }
        });
        let clean = redact(value);
        assert!(clean.get("OPENAI_API_KEY").is_none());
        assert!(clean["providers"].get("gemini_api_key").is_none());
        assert_eq!(clean["providers"]["model"], "gemini");
        assert_eq!(clean["threshold"], 80);
    }

    #[test]
    fn writes_record_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default();
        let mut run = PipelineRun::new(config.clone());
        let step = outcome(StepKind::Parse, "three subnets");
        run.record(step.clone()).unwrap();

        let mut sink = JsonRecordSink::new(dir.path().join("logs"))
            .with_config_entry("parser", serde_json::json!("claude"));
        sink.on_run_start(run.run_id, &config).unwrap();
        sink.on_step_complete(&step).unwrap();
        sink.on_run_complete(&summarize(&run)).unwrap();

        let path = sink.written_path().unwrap().to_path_buf();
        let data = std::fs::read_to_string(&path).unwrap();
        let parsed: SessionRecord = serde_json::from_str(&data).unwrap();
        assert_eq!(parsed.run_id, Some(run.run_id));
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.configuration["parser"], "claude");
        assert_eq!(parsed.configuration["timeout"], "300s");
        assert!(parsed.end_time.is_some());
        assert_eq!(parsed.summary.unwrap().total_steps, 1);
    }

    #[test]
    fn same_second_runs_write_separate_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default();
        let mut paths = Vec::new();
        for _ in 0..2 {
            let run = PipelineRun::new(config.clone());
            let mut sink = JsonRecordSink::new(dir.path());
            sink.on_run_start(run.run_id, &config).unwrap();
            sink.on_run_complete(&summarize(&run)).unwrap();
            let path = sink.written_path().unwrap().to_path_buf();
            assert!(path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with(&format!("_{}.json", run.run_id)));
            paths.push(path);
        }

        assert_ne!(paths[0], paths[1]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
