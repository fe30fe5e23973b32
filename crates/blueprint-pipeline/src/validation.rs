//! Pre-run validation: lint rules and diagnostics.
//!
//! Checks a [`PipelineConfig`] and [`CapabilityRegistry`] before any step
//! executes. Call [`validate`] for advisory diagnostics or
//! [`validate_or_raise`] to fail on the first `Error`-severity issue.

use std::time::Duration;

use blueprint_types::{BackoffPolicy, BlueprintError, CapabilityRole, PipelineConfig, Result};

use crate::capability::CapabilityRegistry;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub role: Option<CapabilityRole>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, config: &PipelineConfig, registry: &CapabilityRegistry) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct ThresholdRangeRule;
impl LintRule for ThresholdRangeRule {
    fn name(&self) -> &str { "threshold_range" }
    fn apply(&self, config: &PipelineConfig, _registry: &CapabilityRegistry) -> Vec<Diagnostic> {
        let t = config.threshold;
        if !t.is_finite() || !(0.0..=100.0).contains(&t) {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("threshold {} is outside 0-100", t),
                role: None,
                fix: Some("Set EVALUATION_THRESHOLD to a value between 0 and 100".into()),
            }]
        } else if t == 0.0 {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: "threshold 0 lets any reported score pass".into(),
                role: None,
                fix: None,
            }]
        } else {
            vec![]
        }
    }
}

struct RetryBudgetRule;
impl LintRule for RetryBudgetRule {
    fn name(&self) -> &str { "retry_budget" }
    fn apply(&self, config: &PipelineConfig, _registry: &CapabilityRegistry) -> Vec<Diagnostic> {
        if config.max_retries == 0 {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "max_retries is 0; every capability needs at least one attempt".into(),
                role: None,
                fix: Some("Set MAX_RETRIES to 1 or more".into()),
            }]
        } else if config.max_retries > 10 {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "max_retries {} may stall a failing run for a long time",
                    config.max_retries
                ),
                role: None,
                fix: None,
            }]
        } else {
            vec![]
        }
    }
}

struct TimeoutRule;
impl LintRule for TimeoutRule {
    fn name(&self) -> &str { "timeout" }
    fn apply(&self, config: &PipelineConfig, _registry: &CapabilityRegistry) -> Vec<Diagnostic> {
        if config.timeout.is_zero() {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "timeout is zero; every attempt would time out immediately".into(),
                role: None,
                fix: Some("Set TIMEOUT_SECONDS to a positive value".into()),
            }]
        } else if config.timeout < Duration::from_secs(5) {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Info,
                message: format!(
                    "timeout {}ms is short for model-backed capabilities",
                    config.timeout.as_millis()
                ),
                role: None,
                fix: None,
            }]
        } else {
            vec![]
        }
    }
}

struct BackoffRule;
impl LintRule for BackoffRule {
    fn name(&self) -> &str { "backoff" }
    fn apply(&self, config: &PipelineConfig, _registry: &CapabilityRegistry) -> Vec<Diagnostic> {
        match &config.backoff {
            BackoffPolicy::Exponential { base, max } if base > max => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!(
                    "backoff base {}ms exceeds cap {}ms",
                    base.as_millis(),
                    max.as_millis()
                ),
                role: None,
                fix: Some("Lower the base delay or raise the cap".into()),
            }],
            _ => vec![],
        }
    }
}

struct CapabilityBindingRule;
impl LintRule for CapabilityBindingRule {
    fn name(&self) -> &str { "capability_binding" }
    fn apply(&self, _config: &PipelineConfig, registry: &CapabilityRegistry) -> Vec<Diagnostic> {
        registry
            .missing_roles()
            .into_iter()
            .map(|role| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("no capability bound to role '{}'", role),
                role: Some(role),
                fix: Some(format!("Register a capability whose role() is {}", role)),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Return all built-in lint rules.
pub fn built_in_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(ThresholdRangeRule),
        Box::new(RetryBudgetRule),
        Box::new(TimeoutRule),
        Box::new(BackoffRule),
        Box::new(CapabilityBindingRule),
    ]
}

/// Run all built-in lint rules and return the collected diagnostics.
pub fn validate(config: &PipelineConfig, registry: &CapabilityRegistry) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for rule in built_in_rules() {
        diagnostics.extend(rule.apply(config, registry));
    }
    diagnostics
}

/// Validate and return `Err` on the first `Error`-severity diagnostic.
pub fn validate_or_raise(
    config: &PipelineConfig,
    registry: &CapabilityRegistry,
) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(config, registry);
    if let Some(err) = diagnostics.iter().find(|d| d.severity == Severity::Error) {
        return Err(match err.role {
            Some(role) => BlueprintError::MissingCapability {
                role: role.to_string(),
            },
            None => BlueprintError::InvalidConfig(format!("[{}] {}", err.rule, err.message)),
        });
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, CapabilityRequest};
    use async_trait::async_trait;
    use blueprint_types::Outcome;

    struct Stub(CapabilityRole);

    #[async_trait]
    impl Capability for Stub {
        fn name(&self) -> &str {
            "stub"
        }
        fn role(&self) -> CapabilityRole {
            self.0
        }
        async fn invoke(&self, _request: &CapabilityRequest) -> Result<Outcome> {
            Ok(Outcome::success("ok"))
        }
    }

    fn full_registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for role in CapabilityRole::ALL {
            registry.register(Stub(role));
        }
        registry
    }

    fn has_rule(diags: &[Diagnostic], rule: &str) -> bool {
        diags.iter().any(|d| d.rule == rule)
    }

    // 1. Default config with every role bound is clean
    #[test]
    fn default_config_is_clean() {
        let diags = validate(&PipelineConfig::default(), &full_registry());
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    }

    // 2. Missing roles become MissingCapability
    #[test]
    fn missing_role_raises_missing_capability() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Stub(CapabilityRole::Parser));
        let diags = validate(&PipelineConfig::default(), &registry);
        assert_eq!(
            diags.iter().filter(|d| d.rule == "capability_binding").count(),
            2
        );

        let err = validate_or_raise(&PipelineConfig::default(), &registry).unwrap_err();
        assert!(matches!(
            err,
            BlueprintError::MissingCapability { ref role } if role == "evaluator"
        ));
    }

    // 3. Threshold out of range
    #[test]
    fn threshold_out_of_range_is_error() {
        let config = PipelineConfig::default().with_threshold(150.0);
        let diags = validate(&config, &full_registry());
        assert!(has_rule(&diags, "threshold_range"));
        let err = validate_or_raise(&config, &full_registry()).unwrap_err();
        assert!(
            matches!(err, BlueprintError::InvalidConfig(ref m) if m.contains("threshold_range"))
        );
    }

    // 4. Zero threshold is only a warning
    #[test]
    fn zero_threshold_warns() {
        let config = PipelineConfig::default().with_threshold(0.0);
        let diags = validate_or_raise(&config, &full_registry()).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
    }

    // 5. Zero retry budget and zero timeout are errors
    #[test]
    fn zero_budgets_are_errors() {
        let config = PipelineConfig::default()
            .with_max_retries(0)
            .with_timeout(Duration::ZERO);
        let diags = validate(&config, &full_registry());
        assert!(has_rule(&diags, "retry_budget"));
        assert!(has_rule(&diags, "timeout"));
        assert!(validate_or_raise(&config, &full_registry()).is_err());
    }

    // 6. Short timeout is informational
    #[test]
    fn short_timeout_is_info() {
        let config = PipelineConfig::default().with_timeout(Duration::from_millis(50));
        let diags = validate_or_raise(&config, &full_registry()).unwrap();
        assert_eq!(diags[0].severity, Severity::Info);
    }

    // 7. Inverted backoff
    #[test]
    fn inverted_backoff_is_error() {
        let config = PipelineConfig::default().with_backoff(BackoffPolicy::Exponential {
            base: Duration::from_secs(30),
            max: Duration::from_secs(1),
        });
        assert!(has_rule(&validate(&config, &full_registry()), "backoff"));
    }
}
