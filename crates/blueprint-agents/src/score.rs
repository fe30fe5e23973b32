//! Pull a numeric score out of free-form evaluator replies.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use blueprint_types::parse_score;

/// Keys checked for a score, in priority order.
pub const SCORE_KEYS: [&str; 2] = ["overall_score", "score"];

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("valid regex"));

// Objects nested at most one level deep.
static EMBEDDED_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("valid regex")
});

static OVERALL_SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""overall_score"\s*:\s*(\d+(?:\.\d+)?)"#).expect("valid regex"));

/// Structured result of reading an evaluator reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The usable score, if one was found.
    pub score: Option<f64>,
    /// The JSON object the score came from, when there was one.
    pub body: Option<Value>,
}

fn score_from_object(value: &Value) -> Option<f64> {
    let object = value.as_object()?;
    SCORE_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(parse_score))
}

/// Read an evaluator reply.
///
/// Tries the whole reply as JSON, then a fenced ```json block, then each
/// embedded object in order, then a bare `"overall_score": N` match. The first
/// candidate that yields a usable score wins.
pub fn extract_evaluation(reply: &str) -> Evaluation {
    let trimmed = reply.trim();

    let mut candidates: Vec<Value> = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        candidates.push(value);
    }
    for caps in FENCED_JSON_RE.captures_iter(reply) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            candidates.push(value);
        }
    }
    for m in EMBEDDED_OBJECT_RE.find_iter(reply) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            candidates.push(value);
        }
    }

    for value in &candidates {
        if let Some(score) = score_from_object(value) {
            return Evaluation {
                score: Some(score),
                body: Some(value.clone()),
            };
        }
    }

    let score = OVERALL_SCORE_RE
        .captures(reply)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .and_then(|raw| parse_score(&serde_json::json!(raw)));

    Evaluation {
        score,
        body: candidates.into_iter().find(Value::is_object),
    }
}

pub fn extract_score(reply: &str) -> Option<f64> {
    extract_evaluation(reply).score
}
