use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Attribute key under which evaluation capabilities report their score.
pub const SCORE_ATTRIBUTE: &str = "score";

// ---------------------------------------------------------------------------
// Outcome: result of one capability invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub content: String,
    pub succeeded: bool,
    pub failure_reason: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Outcome {
    /// Create a successful outcome carrying `content`.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            succeeded: true,
            failure_reason: None,
            confidence: None,
            attributes: HashMap::new(),
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            succeeded: false,
            failure_reason: Some(reason.into()),
            confidence: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach a numeric score under the `score` attribute.
    pub fn with_score(self, score: f64) -> Self {
        self.with_attribute(SCORE_ATTRIBUTE, serde_json::json!(score))
    }

    /// The reported score, if present and usable for gating.
    pub fn score(&self) -> Option<f64> {
        self.attributes.get(SCORE_ATTRIBUTE).and_then(parse_score)
    }

    /// Enforce the success/failure shape: a failed outcome has no content and
    /// a non-empty reason, a successful one has no reason.
    pub fn normalized(mut self) -> Self {
        if self.succeeded {
            self.failure_reason = None;
        } else {
            self.content.clear();
            let missing = self
                .failure_reason
                .as_deref()
                .map(|r| r.trim().is_empty())
                .unwrap_or(true);
            if missing {
                self.failure_reason = Some("capability reported failure without a reason".into());
            }
        }
        self
    }
}

/// Interpret a JSON value as a gate score.
///
/// Accepts numbers and numeric strings. Anything non-finite or outside
/// `0..=100` is treated as absent.
pub fn parse_score(value: &serde_json::Value) -> Option<f64> {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if raw.is_finite() && (0.0..=100.0).contains(&raw) {
        Some(raw)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_has_no_reason() {
        let o = Outcome::success("diagram text");
        assert!(o.succeeded);
        assert_eq!(o.content, "diagram text");
        assert!(o.failure_reason.is_none());
    }

    #[test]
    fn fail_has_empty_content() {
        let o = Outcome::fail("boom");
        assert!(!o.succeeded);
        assert!(o.content.is_empty());
        assert_eq!(o.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn normalized_clears_content_on_failure() {
        let o = Outcome {
            content: "partial".into(),
            succeeded: false,
            failure_reason: None,
            confidence: None,
            attributes: HashMap::new(),
        }
        .normalized();
        assert!(o.content.is_empty());
        assert!(!o.failure_reason.unwrap().is_empty());
    }

    #[test]
    fn normalized_replaces_blank_reason() {
        let o = Outcome::fail("   ").normalized();
        assert_ne!(o.failure_reason.as_deref(), Some("   "));
    }

    #[test]
    fn normalized_drops_reason_on_success() {
        let mut o = Outcome::success("ok");
        o.failure_reason = Some("stale".into());
        assert!(o.normalized().failure_reason.is_none());
    }

    #[test]
    fn score_reads_attribute() {
        let o = Outcome::success("{}").with_score(85.0);
        assert_eq!(o.score(), Some(85.0));
        assert!(Outcome::success("{}").score().is_none());
    }

    #[test]
    fn parse_score_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_score(&json!(92)), Some(92.0));
        assert_eq!(parse_score(&json!(79.5)), Some(79.5));
        assert_eq!(parse_score(&json!(" 80 ")), Some(80.0));
        assert_eq!(parse_score(&json!(0)), Some(0.0));
        assert_eq!(parse_score(&json!(100)), Some(100.0));
    }

    #[test]
    fn parse_score_rejects_unusable_values() {
        assert_eq!(parse_score(&json!("high")), None);
        assert_eq!(parse_score(&json!(101)), None);
        assert_eq!(parse_score(&json!(-1)), None);
        assert_eq!(parse_score(&json!("NaN")), None);
        assert_eq!(parse_score(&json!(null)), None);
        assert_eq!(parse_score(&json!([90])), None);
    }
}
