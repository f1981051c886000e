//! Scenario tests for the composed policy chain.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rampart_core::{
    BreakerMode, BulkheadSettings, CallOptions, CircuitBreakerConfig, CircuitBreakerSettings,
    ErrorFilter, FallbackConfig, FaultError, OperationProfile, Rampart, RetryConfig,
    RetrySettings, TimeoutSettings,
};
use tokio_util::sync::CancellationToken;

fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ApiError {
    Unavailable,
    BadRequest,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unavailable => write!(f, "service unavailable"),
            ApiError::BadRequest => write!(f, "bad request"),
        }
    }
}

fn full_profile() -> OperationProfile<String, ApiError> {
    OperationProfile::new()
        .with_timeout(TimeoutSettings { timeout_ms: 1000 })
        .with_retry(RetryConfig::new(RetrySettings {
            max_retries: Some(3),
            delay_ms: 0,
            jitter_ms: 0,
            max_duration_ms: None,
        }))
        .with_circuit_breaker(CircuitBreakerConfig::default())
        .with_bulkhead(BulkheadSettings {
            capacity: 10,
            queue_size: 2,
        })
        .with_fallback(FallbackConfig::from_value("fallback".to_string()))
}

#[tokio::test]
async fn one_success_through_the_full_chain_counts_exactly_once() {
    init_test_tracing();
    let engine = Rampart::new();
    let op = engine.operation("orders.place", full_profile());

    let baseline = engine
        .metrics()
        .snapshot("orders.place")
        .expect("metrics enabled at registration");

    let result = op.invoke(|| async { Ok("placed".to_string()) }).await;
    assert_eq!(result.ok().as_deref(), Some("placed"));

    let delta = engine
        .metrics()
        .snapshot("orders.place")
        .expect("still present")
        .delta(&baseline);

    assert_eq!(delta.invocations, 1);
    assert_eq!(delta.invocations_failed, 0);

    // Nothing failure-shaped moved.
    assert_eq!(delta.retry_retries, 0);
    assert_eq!(delta.retry_calls_failed, 0);
    assert_eq!(delta.retry_calls_succeeded_retried, 0);
    assert_eq!(delta.timeout_calls_timed_out, 0);
    assert_eq!(delta.breaker_calls_failed, 0);
    assert_eq!(delta.breaker_calls_prevented, 0);
    assert_eq!(delta.breaker_opened, 0);
    assert_eq!(delta.bulkhead_calls_rejected, 0);
    assert_eq!(delta.fallback_calls, 0);

    // The single pass-through is visible on the success side.
    assert_eq!(delta.retry_calls_succeeded_not_retried, 1);
    assert_eq!(delta.timeout_calls_not_timed_out, 1);
    assert_eq!(delta.breaker_calls_succeeded, 1);
    assert_eq!(delta.bulkhead_calls_accepted, 1);
    assert_eq!(delta.timeout_execution_duration.count, 1);
    assert_eq!(delta.bulkhead_execution_duration.count, 1);
    assert_eq!(delta.bulkhead_wait_time.count, 0);

    // Gauges are back at rest.
    assert_eq!(delta.bulkhead_concurrent_executions, 0);
    assert_eq!(delta.bulkhead_queue_population, 0);
}

#[tokio::test]
async fn fallback_filters_choose_between_substitute_and_propagation() {
    let engine = Rampart::new();

    // applyOn covers only BadRequest: Unavailable must propagate unchanged.
    let strict = engine.operation(
        "profile.render.strict",
        OperationProfile::new().with_fallback(
            FallbackConfig::from_value("cached".to_string()).apply_on(ErrorFilter::matching(
                |error| matches!(error, FaultError::Execution(ApiError::BadRequest)),
            )),
        ),
    );
    let result = strict
        .invoke(|| async { Err::<String, _>(ApiError::Unavailable) })
        .await;
    assert!(matches!(
        result,
        Err(FaultError::Execution(ApiError::Unavailable))
    ));
    let snapshot = strict.metrics_snapshot().expect("metrics enabled");
    assert_eq!(snapshot.fallback_calls, 0);

    // applyOn covering the thrown error substitutes and counts one call.
    let lenient = engine.operation(
        "profile.render.lenient",
        OperationProfile::new().with_fallback(
            FallbackConfig::from_value("cached".to_string()).apply_on(ErrorFilter::matching(
                |error| matches!(error, FaultError::Execution(ApiError::Unavailable)),
            )),
        ),
    );
    let result = lenient
        .invoke(|| async { Err::<String, _>(ApiError::Unavailable) })
        .await;
    assert_eq!(result.ok().as_deref(), Some("cached"));
    let snapshot = lenient.metrics_snapshot().expect("metrics enabled");
    assert_eq!(snapshot.fallback_calls, 1);
    assert_eq!(snapshot.invocations_failed, 0);
}

#[tokio::test]
async fn per_call_fallback_override_beats_the_profile() {
    let engine = Rampart::new();
    let op = engine.operation(
        "profile.render.skip",
        OperationProfile::new().with_fallback(
            FallbackConfig::from_value("cached".to_string()).skip_on(ErrorFilter::any()),
        ),
    );

    // Profile-level skipOn suppresses the fallback.
    let result = op
        .invoke(|| async { Err::<String, _>(ApiError::Unavailable) })
        .await;
    assert!(result.is_err());

    // The per-call override re-enables it.
    let result = op
        .invoke_with(
            || async { Err::<String, _>(ApiError::Unavailable) },
            CallOptions::new().with_fallback_skip_on(ErrorFilter::none()),
        )
        .await;
    assert_eq!(result.ok().as_deref(), Some("cached"));
}

#[tokio::test]
async fn retry_burns_budget_against_an_open_breaker() {
    let engine = Rampart::new();
    let op = engine.operation(
        "billing.sync",
        OperationProfile::<String, ApiError>::new()
            .with_retry(RetryConfig::new(RetrySettings {
                max_retries: Some(5),
                delay_ms: 0,
                jitter_ms: 0,
                max_duration_ms: None,
            }))
            .with_circuit_breaker(CircuitBreakerConfig::new(CircuitBreakerSettings {
                request_volume_threshold: 2,
                failure_ratio: 1.0,
                open_duration_ms: 60_000,
                success_threshold: 1,
            })),
    );

    let executions = Arc::new(AtomicU32::new(0));
    let executions_in_op = executions.clone();
    let result = op
        .invoke(move || {
            let executions = executions_in_op.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(ApiError::Unavailable)
            }
        })
        .await;

    // The second failure opens the breaker; the remaining four attempts are
    // prevented without reaching the operation.
    assert!(matches!(result, Err(FaultError::CircuitBreakerOpen { .. })));
    assert_eq!(executions.load(Ordering::SeqCst), 2);

    let snapshot = op.metrics_snapshot().expect("metrics enabled");
    assert_eq!(snapshot.retry_retries, 5);
    assert_eq!(snapshot.retry_calls_failed, 1);
    assert_eq!(snapshot.breaker_calls_failed, 2);
    assert_eq!(snapshot.breaker_calls_prevented, 4);
    assert_eq!(snapshot.breaker_opened, 1);
    assert_eq!(snapshot.invocations, 1);
    assert_eq!(snapshot.invocations_failed, 1);
}

#[tokio::test]
async fn timeout_failure_is_recovered_by_the_fallback() {
    let engine = Rampart::new();
    let op = engine.operation(
        "catalog.search",
        OperationProfile::<String, ApiError>::new()
            .with_timeout(TimeoutSettings { timeout_ms: 50 })
            .with_fallback(FallbackConfig::from_value("stale results".to_string())),
    );

    let result = op
        .invoke(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("fresh results".to_string())
        })
        .await;

    assert_eq!(result.ok().as_deref(), Some("stale results"));
    let snapshot = op.metrics_snapshot().expect("metrics enabled");
    assert_eq!(snapshot.timeout_calls_timed_out, 1);
    assert_eq!(snapshot.fallback_calls, 1);
    // The fallback made the invocation succeed.
    assert_eq!(snapshot.invocations_failed, 0);
}

#[tokio::test]
async fn bulkhead_admits_capacity_and_recovers_after_completion() {
    let engine = Rampart::new();
    let op = Arc::new(engine.operation(
        "inventory.reserve",
        OperationProfile::<u32, ApiError>::new().with_bulkhead(BulkheadSettings {
            capacity: 2,
            queue_size: 0,
        }),
    ));

    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let running = Arc::new(AtomicU32::new(0));

    let mut holders = Vec::new();
    for _ in 0..2 {
        let op = op.clone();
        let release_rx = release_rx.clone();
        let running = running.clone();
        holders.push(tokio::spawn(async move {
            op.invoke(move || {
                let mut release_rx = release_rx.clone();
                let running = running.clone();
                async move {
                    running.fetch_add(1, Ordering::SeqCst);
                    while !*release_rx.borrow() {
                        release_rx.changed().await.expect("sender alive");
                    }
                    Ok(1u32)
                }
            })
            .await
        }));
    }

    // Wait until both calls occupy their slots.
    while running.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(op.executing(), Some(2));

    // The third concurrent caller is rejected immediately.
    let rejected = op.invoke(|| async { Ok(3u32) }).await;
    assert!(matches!(
        rejected,
        Err(FaultError::BulkheadFull { capacity: 2, .. })
    ));

    release_tx.send(true).expect("receivers alive");
    for holder in holders {
        assert!(holder.await.expect("join").is_ok());
    }

    // A slot freed up: the next call is admitted.
    assert!(op.invoke(|| async { Ok(4u32) }).await.is_ok());

    let snapshot = op.metrics_snapshot().expect("metrics enabled");
    assert_eq!(snapshot.bulkhead_calls_accepted, 3);
    assert_eq!(snapshot.bulkhead_calls_rejected, 1);
    assert_eq!(snapshot.invocations, 4);
    assert_eq!(snapshot.invocations_failed, 1);
}

#[tokio::test]
async fn cancellation_unwinds_without_retry_or_fallback() {
    let engine = Rampart::new();
    let op = Arc::new(engine.operation(
        "ledger.append",
        OperationProfile::<u32, ApiError>::new()
            .with_retry(RetryConfig::new(RetrySettings {
                max_retries: Some(10),
                delay_ms: 0,
                jitter_ms: 0,
                max_duration_ms: None,
            }))
            .with_bulkhead(BulkheadSettings {
                capacity: 1,
                queue_size: 1,
            })
            .with_fallback(FallbackConfig::from_value(0u32)),
    ));

    // Occupy the only slot.
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let op_holder = op.clone();
    let holder = tokio::spawn(async move {
        op_holder
            .invoke(move || {
                let mut release_rx = release_rx.clone();
                async move {
                    while !*release_rx.borrow() {
                        release_rx.changed().await.expect("sender alive");
                    }
                    Ok(1u32)
                }
            })
            .await
    });
    while op.executing() != Some(1) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Queue a second call, then cancel it while it waits.
    let cancel = CancellationToken::new();
    let op_waiter = op.clone();
    let cancel_for_call = cancel.clone();
    let waiter = tokio::spawn(async move {
        op_waiter
            .invoke_with(
                || async { Ok(2u32) },
                CallOptions::new().with_cancellation(cancel_for_call),
            )
            .await
    });
    while op.queued() != Some(1) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    cancel.cancel();
    let outcome = waiter.await.expect("join");

    // Cancelled: not retried, not substituted, queue slot released.
    assert!(matches!(outcome, Err(FaultError::Cancelled { .. })));
    assert_eq!(op.queued(), Some(0));

    let snapshot = op.metrics_snapshot().expect("metrics enabled");
    assert_eq!(snapshot.retry_retries, 0);
    assert_eq!(snapshot.fallback_calls, 0);

    release_tx.send(true).expect("receiver alive");
    assert!(holder.await.expect("join").is_ok());
}

#[tokio::test]
async fn concurrent_callers_drain_through_the_queue_without_loss() -> anyhow::Result<()> {
    let engine = Rampart::new();
    let op = Arc::new(engine.operation(
        "notify.send",
        OperationProfile::<u32, ApiError>::new().with_bulkhead(BulkheadSettings {
            capacity: 4,
            queue_size: 16,
        }),
    ));

    let calls = (0..20u32).map(|id| {
        let op = op.clone();
        tokio::spawn(async move {
            op.invoke(move || async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(id)
            })
            .await
        })
    });
    let outcomes = futures::future::join_all(calls).await;

    // Capacity 4 with a 16-deep queue absorbs all 20 callers.
    for outcome in outcomes {
        assert!(outcome?.is_ok());
    }

    let snapshot = op.metrics_snapshot().expect("metrics enabled");
    assert_eq!(snapshot.invocations, 20);
    assert_eq!(snapshot.bulkhead_calls_accepted, 20);
    assert_eq!(snapshot.bulkhead_calls_rejected, 0);
    assert_eq!(snapshot.bulkhead_concurrent_executions, 0);
    assert_eq!(snapshot.bulkhead_queue_population, 0);
    assert_eq!(snapshot.bulkhead_execution_duration.count, 20);
    Ok(())
}

#[tokio::test]
async fn handles_for_the_same_key_share_breaker_state() {
    let engine = Rampart::new();
    let breaker = CircuitBreakerConfig::new(CircuitBreakerSettings {
        request_volume_threshold: 2,
        failure_ratio: 1.0,
        open_duration_ms: 60_000,
        success_threshold: 1,
    });

    let a = engine.operation(
        "shipping.quote",
        OperationProfile::<String, ApiError>::new().with_circuit_breaker(breaker.clone()),
    );
    let b = engine.operation(
        "shipping.quote",
        OperationProfile::<String, ApiError>::new().with_circuit_breaker(breaker),
    );

    let _ = a
        .invoke(|| async { Err::<String, _>(ApiError::Unavailable) })
        .await;
    let _ = b
        .invoke(|| async { Err::<String, _>(ApiError::Unavailable) })
        .await;

    // The second failure, through the other handle, opened the shared breaker.
    assert_eq!(a.breaker_mode(), Some(BreakerMode::Open));
    assert_eq!(b.breaker_mode(), Some(BreakerMode::Open));
    let prevented = a
        .invoke(|| async { Ok("quote".to_string()) })
        .await;
    assert!(matches!(
        prevented,
        Err(FaultError::CircuitBreakerOpen { .. })
    ));
}
