use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BackoffPolicy: delay between retry attempts
// ---------------------------------------------------------------------------

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed {
        #[serde(with = "crate::duration_serde")]
        delay: Duration,
    },
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential {
        #[serde(with = "crate::duration_serde")]
        base: Duration,
        #[serde(with = "crate::duration_serde")]
        max: Duration,
    },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 2u64.saturating_pow(attempt.min(u32::MAX as usize) as u32);
                let millis = (base.as_millis() as u64).saturating_mul(factor);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(4),
            max: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig: immutable run parameters
// ---------------------------------------------------------------------------

pub const DEFAULT_THRESHOLD: f64 = 80.0;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum score (inclusive) an evaluation step must report to pass.
    pub threshold: f64,
    /// Total attempts per capability invocation, including the first.
    pub max_retries: usize,
    /// Per-attempt deadline.
    #[serde(with = "crate::duration_serde")]
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}
