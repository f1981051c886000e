//! Retry policy.
//!
//! Re-invokes the wrapped chain on retryable failures until the retry budget
//! or the total-duration window runs out. `abort_on` beats `retry_on`; a
//! cancelled invocation is never retried. Each retry waits the configured
//! delay with an independent uniform jitter draw, and consumes one retry
//! from the budget; the first attempt is free.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rampart_metrics::{MetricsHandle, PolicyEvent, RetryOutcome};
use tracing::debug;

use crate::config::{RetryConfig, RetrySettings};
use crate::error::{FaultError, FaultResult};
use crate::invocation::Invocation;

/// Delay before the next attempt: `delay_ms ± jitter_ms`, drawn fresh per
/// attempt, clamped at zero.
fn attempt_delay(settings: &RetrySettings) -> Duration {
    if settings.jitter_ms == 0 {
        return Duration::from_millis(settings.delay_ms);
    }
    let low = settings.delay_ms.saturating_sub(settings.jitter_ms);
    let high = settings.delay_ms.saturating_add(settings.jitter_ms);
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

/// Drive the wrapped chain through the retry loop.
pub(crate) async fn execute<T, E, F, Fut>(
    config: &RetryConfig<E>,
    invocation: &Invocation,
    metrics: &MetricsHandle,
    mut attempt: F,
) -> FaultResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FaultResult<T, E>>,
{
    let window = config.settings.max_duration_ms.map(Duration::from_millis);
    let mut retries_used: u32 = 0;

    loop {
        let error = match attempt().await {
            Ok(value) => {
                let outcome = if retries_used == 0 {
                    RetryOutcome::SucceededNotRetried
                } else {
                    RetryOutcome::SucceededRetried
                };
                metrics.record(PolicyEvent::RetryFinished { outcome });
                return Ok(value);
            }
            Err(error) => error,
        };

        // External cancellation propagates without a retry verdict.
        if error.is_cancelled() {
            return Err(error);
        }

        let budget_left = config
            .settings
            .max_retries
            .map_or(true, |max| retries_used < max);
        let window_left =
            window.map_or(true, |window| invocation.started().elapsed() < window);

        if !config.should_retry(&error) || !budget_left || !window_left {
            metrics.record(PolicyEvent::RetryFinished {
                outcome: RetryOutcome::Failed,
            });
            return Err(error);
        }

        let delay = attempt_delay(&config.settings);
        if delay.is_zero() {
            if invocation.is_cancelled() {
                return Err(FaultError::Cancelled {
                    operation: invocation.operation_name(),
                });
            }
        } else {
            tokio::select! {
                biased;
                _ = invocation.cancelled() => {
                    return Err(FaultError::Cancelled {
                        operation: invocation.operation_name(),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        retries_used += 1;
        metrics.record(PolicyEvent::RetryAttempted);
        debug!(
            operation = %invocation.operation(),
            retries_used,
            "retrying after failure"
        );
    }
}
