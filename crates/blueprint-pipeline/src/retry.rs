//! Bounded retry around a single capability invocation.

use std::time::Duration;

use blueprint_types::{BackoffPolicy, BlueprintError, Outcome, StepKind};

/// What the retry wrapper settled on, plus how many attempts it took.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub outcome: Outcome,
    pub attempts: usize,
}

/// Delay before the next attempt: the policy's delay, raised to whatever a
/// rate limit asked for.
fn retry_delay(error: &BlueprintError, policy: &BackoffPolicy, attempt: usize) -> Duration {
    let delay = policy.delay_for_attempt(attempt - 1);
    match error {
        BlueprintError::RateLimited { retry_after_ms, .. } => {
            delay.max(Duration::from_millis(*retry_after_ms))
        }
        _ => delay,
    }
}

/// Execute a capability call with retry logic.
///
/// The closure `f` is called up to `max_attempts` times (at least once).
/// Only errors satisfying [`blueprint_types::BlueprintError::is_retryable`]
/// are retried; an `Ok` outcome is returned as-is, even when it reports a
/// failure. Between attempts the function sleeps for the duration dictated
/// by `policy`, or longer when a rate limit names its own delay. Terminal
/// errors end the loop on the spot.
///
/// Never returns `Err`: a non-retryable error or an exhausted budget becomes
/// `Outcome::fail` carrying the last error's message.
pub async fn execute_with_retry<F, Fut>(
    f: F,
    max_attempts: usize,
    policy: &BackoffPolicy,
    step: StepKind,
) -> RetryOutcome
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = blueprint_types::Result<Outcome>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(outcome) => {
                return RetryOutcome {
                    outcome,
                    attempts: attempt,
                }
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = retry_delay(&e, policy, attempt);
                tracing::warn!(
                    step = %step,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_terminal() {
                    tracing::error!(
                        step = %step,
                        attempt,
                        error = %e,
                        "Terminal error, not retrying"
                    );
                } else if e.is_retryable() {
                    tracing::error!(step = %step, attempt, error = %e, "Retries exhausted");
                } else {
                    tracing::error!(step = %step, attempt, error = %e, "Non-retryable error");
                }
                return RetryOutcome {
                    outcome: Outcome::fail(e.to_string()),
                    attempts: attempt,
                };
            }
        }
    }
}
