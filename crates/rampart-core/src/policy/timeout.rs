//! Timeout policy.
//!
//! Races the guarded call against its deadline and resolves a single winner:
//! the race is `biased` towards natural completion, so a result that is
//! ready when the deadline fires still wins. On expiry the guarded future is
//! dropped, which both signals cancellation and abandons the wait; any
//! bulkhead slot or queue position held inside is released by its guard.
//! The underlying work is asked to stop, never waited for.

use std::future::Future;
use std::time::Duration;

use rampart_metrics::{MetricsHandle, PolicyEvent};
use tokio::time::Instant;
use tracing::warn;

use crate::config::TimeoutSettings;
use crate::error::{FaultError, FaultResult};
use crate::invocation::Invocation;

/// Run the guarded call under a deadline.
pub(crate) async fn execute<T, E, F>(
    settings: &TimeoutSettings,
    invocation: &Invocation,
    metrics: &MetricsHandle,
    guarded: F,
) -> FaultResult<T, E>
where
    F: Future<Output = FaultResult<T, E>>,
{
    let deadline = Duration::from_millis(settings.timeout_ms);
    let started = Instant::now();
    tokio::pin!(guarded);

    tokio::select! {
        biased;
        outcome = &mut guarded => {
            metrics.record(PolicyEvent::TimeoutFinished {
                timed_out: false,
                duration: started.elapsed(),
            });
            outcome
        }
        _ = tokio::time::sleep(deadline) => {
            metrics.record(PolicyEvent::TimeoutFinished {
                timed_out: true,
                duration: started.elapsed(),
            });
            warn!(
                operation = %invocation.operation(),
                timeout_ms = settings.timeout_ms,
                "call exceeded its deadline"
            );
            Err(FaultError::TimedOut {
                operation: invocation.operation_name(),
                after_ms: settings.timeout_ms,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_metrics::OperationMetrics;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn fixture(timeout_ms: u64) -> (TimeoutSettings, Invocation, MetricsHandle) {
        (
            TimeoutSettings { timeout_ms },
            Invocation::new(Arc::from("catalog.lookup"), CancellationToken::new()),
            MetricsHandle::Enabled(Arc::new(OperationMetrics::default())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn completion_before_deadline_passes_through() {
        let (settings, invocation, metrics) = fixture(100);

        let result = execute::<_, String, _>(&settings, &invocation, &metrics, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(42)
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        let snapshot = metrics.snapshot().expect("enabled");
        assert_eq!(snapshot.timeout_calls_not_timed_out, 1);
        assert_eq!(snapshot.timeout_calls_timed_out, 0);
        assert_eq!(snapshot.timeout_execution_duration.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_abandons_the_call() {
        let (settings, invocation, metrics) = fixture(50);

        let result = execute::<i32, String, _>(&settings, &invocation, &metrics, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        })
        .await;

        assert!(matches!(
            result,
            Err(FaultError::TimedOut { after_ms: 50, .. })
        ));
        let snapshot = metrics.snapshot().expect("enabled");
        assert_eq!(snapshot.timeout_calls_timed_out, 1);
        assert_eq!(snapshot.timeout_calls_not_timed_out, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_before_deadline_is_not_a_timeout() {
        let (settings, invocation, metrics) = fixture(100);

        let result = execute::<i32, String, _>(&settings, &invocation, &metrics, async {
            Err(FaultError::Execution("boom".to_string()))
        })
        .await;

        assert!(matches!(result, Err(FaultError::Execution(e)) if e == "boom"));
        let snapshot = metrics.snapshot().expect("enabled");
        assert_eq!(snapshot.timeout_calls_not_timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_completion_wins_a_tie_with_the_deadline() {
        let (settings, invocation, metrics) = fixture(50);

        // Completes at exactly the deadline instant; the biased race must
        // resolve it as a completion.
        let result = execute::<i32, String, _>(&settings, &invocation, &metrics, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(7)
        })
        .await;

        assert_eq!(result.ok(), Some(7));
        let snapshot = metrics.snapshot().expect("enabled");
        assert_eq!(snapshot.timeout_calls_timed_out, 0);
        assert_eq!(snapshot.timeout_calls_not_timed_out, 1);
    }
}
