//! Per-operation counters, gauges and histograms.
//!
//! All counters are monotonically non-decreasing for the lifetime of the
//! operation. Gauges reflect instantaneous state and saturate at zero rather
//! than wrapping if events ever arrive out of order. Histogram updates take a
//! short mutex; a poisoned mutex is absorbed so that bookkeeping can never
//! panic out of a business call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::event::{BreakerCallOutcome, BreakerMode, PolicyEvent, RetryOutcome};
use crate::snapshot::{HistogramSnapshot, MetricsSnapshot};

/// Duration sample accumulator (count / total / min / max).
#[derive(Debug, Default, Clone)]
pub(crate) struct Histogram {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl Histogram {
    fn observe(&mut self, sample: Duration) {
        self.count += 1;
        self.total += sample;
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        self.max = Some(self.max.map_or(sample, |m| m.max(sample)));
    }

    pub(crate) fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count,
            total: self.total,
            min: self.min,
            max: self.max,
        }
    }
}

/// The full counter set for one protected operation.
///
/// Materialized once per operation when metrics are enabled, shared by every
/// invocation of that operation.
#[derive(Debug, Default)]
pub struct OperationMetrics {
    invocations: AtomicU64,
    invocations_failed: AtomicU64,

    retry_retries: AtomicU64,
    retry_calls_succeeded_not_retried: AtomicU64,
    retry_calls_succeeded_retried: AtomicU64,
    retry_calls_failed: AtomicU64,

    timeout_calls_timed_out: AtomicU64,
    timeout_calls_not_timed_out: AtomicU64,
    timeout_execution_duration: Mutex<Histogram>,

    breaker_calls_succeeded: AtomicU64,
    breaker_calls_failed: AtomicU64,
    breaker_calls_prevented: AtomicU64,
    breaker_opened: AtomicU64,
    breaker_time_closed_ns: AtomicU64,
    breaker_time_open_ns: AtomicU64,
    breaker_time_half_open_ns: AtomicU64,

    bulkhead_calls_accepted: AtomicU64,
    bulkhead_calls_rejected: AtomicU64,
    bulkhead_concurrent_executions: AtomicU64,
    bulkhead_queue_population: AtomicU64,
    bulkhead_execution_duration: Mutex<Histogram>,
    bulkhead_wait_time: Mutex<Histogram>,

    fallback_calls: AtomicU64,
}

fn saturating_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn gauge_dec(gauge: &AtomicU64) {
    // Saturate at zero; a wrapped gauge would read as billions of in-flight
    // calls after a single stray decrement.
    let _ = gauge.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
        Some(v.saturating_sub(1))
    });
}

fn observe(histogram: &Mutex<Histogram>, sample: Duration) {
    let mut guard = match histogram.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.observe(sample);
}

fn read(histogram: &Mutex<Histogram>) -> HistogramSnapshot {
    let guard = match histogram.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.snapshot()
}

impl OperationMetrics {
    /// Fold one policy event into the counter set.
    pub fn record(&self, event: PolicyEvent) {
        match event {
            PolicyEvent::InvocationFinished { failed } => {
                self.invocations.fetch_add(1, Ordering::AcqRel);
                if failed {
                    self.invocations_failed.fetch_add(1, Ordering::AcqRel);
                }
            }
            PolicyEvent::RetryAttempted => {
                self.retry_retries.fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::RetryFinished { outcome } => {
                let counter = match outcome {
                    RetryOutcome::SucceededNotRetried => &self.retry_calls_succeeded_not_retried,
                    RetryOutcome::SucceededRetried => &self.retry_calls_succeeded_retried,
                    RetryOutcome::Failed => &self.retry_calls_failed,
                };
                counter.fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::TimeoutFinished { timed_out, duration } => {
                let counter = if timed_out {
                    &self.timeout_calls_timed_out
                } else {
                    &self.timeout_calls_not_timed_out
                };
                counter.fetch_add(1, Ordering::AcqRel);
                observe(&self.timeout_execution_duration, duration);
            }
            PolicyEvent::BreakerCallFinished { outcome } => {
                let counter = match outcome {
                    BreakerCallOutcome::Succeeded => &self.breaker_calls_succeeded,
                    BreakerCallOutcome::Failed => &self.breaker_calls_failed,
                    BreakerCallOutcome::Prevented => &self.breaker_calls_prevented,
                };
                counter.fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::BreakerOpened => {
                self.breaker_opened.fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::BreakerStateDwell { mode, dwell } => {
                let accumulator = match mode {
                    BreakerMode::Closed => &self.breaker_time_closed_ns,
                    BreakerMode::Open => &self.breaker_time_open_ns,
                    BreakerMode::HalfOpen => &self.breaker_time_half_open_ns,
                };
                accumulator.fetch_add(saturating_ns(dwell), Ordering::AcqRel);
            }
            PolicyEvent::BulkheadAccepted => {
                self.bulkhead_calls_accepted.fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::BulkheadRejected => {
                self.bulkhead_calls_rejected.fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::BulkheadEntered => {
                self.bulkhead_concurrent_executions
                    .fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::BulkheadExited { duration } => {
                gauge_dec(&self.bulkhead_concurrent_executions);
                observe(&self.bulkhead_execution_duration, duration);
            }
            PolicyEvent::BulkheadQueued => {
                self.bulkhead_queue_population.fetch_add(1, Ordering::AcqRel);
            }
            PolicyEvent::BulkheadDequeued { waited, admitted } => {
                gauge_dec(&self.bulkhead_queue_population);
                // Abandoned waiters leave no trace beyond the gauge movement.
                if admitted {
                    observe(&self.bulkhead_wait_time, waited);
                }
            }
            PolicyEvent::FallbackApplied => {
                self.fallback_calls.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Point-in-time copy of every counter, gauge and histogram.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Acquire),
            invocations_failed: self.invocations_failed.load(Ordering::Acquire),
            retry_retries: self.retry_retries.load(Ordering::Acquire),
            retry_calls_succeeded_not_retried: self
                .retry_calls_succeeded_not_retried
                .load(Ordering::Acquire),
            retry_calls_succeeded_retried: self
                .retry_calls_succeeded_retried
                .load(Ordering::Acquire),
            retry_calls_failed: self.retry_calls_failed.load(Ordering::Acquire),
            timeout_calls_timed_out: self.timeout_calls_timed_out.load(Ordering::Acquire),
            timeout_calls_not_timed_out: self.timeout_calls_not_timed_out.load(Ordering::Acquire),
            timeout_execution_duration: read(&self.timeout_execution_duration),
            breaker_calls_succeeded: self.breaker_calls_succeeded.load(Ordering::Acquire),
            breaker_calls_failed: self.breaker_calls_failed.load(Ordering::Acquire),
            breaker_calls_prevented: self.breaker_calls_prevented.load(Ordering::Acquire),
            breaker_opened: self.breaker_opened.load(Ordering::Acquire),
            breaker_time_closed: Duration::from_nanos(
                self.breaker_time_closed_ns.load(Ordering::Acquire),
            ),
            breaker_time_open: Duration::from_nanos(
                self.breaker_time_open_ns.load(Ordering::Acquire),
            ),
            breaker_time_half_open: Duration::from_nanos(
                self.breaker_time_half_open_ns.load(Ordering::Acquire),
            ),
            bulkhead_calls_accepted: self.bulkhead_calls_accepted.load(Ordering::Acquire),
            bulkhead_calls_rejected: self.bulkhead_calls_rejected.load(Ordering::Acquire),
            bulkhead_concurrent_executions: self
                .bulkhead_concurrent_executions
                .load(Ordering::Acquire),
            bulkhead_queue_population: self.bulkhead_queue_population.load(Ordering::Acquire),
            bulkhead_execution_duration: read(&self.bulkhead_execution_duration),
            bulkhead_wait_time: read(&self.bulkhead_wait_time),
            fallback_calls: self.fallback_calls.load(Ordering::Acquire),
        }
    }

    /// Instantaneous concurrent-executions gauge.
    pub fn concurrent_executions(&self) -> u64 {
        self.bulkhead_concurrent_executions.load(Ordering::Acquire)
    }

    /// Instantaneous queue-population gauge.
    pub fn queue_population(&self) -> u64 {
        self.bulkhead_queue_population.load(Ordering::Acquire)
    }
}

/// Recording endpoint handed to policies.
///
/// `Disabled` is the process-wide "metrics off" mode: nothing was allocated
/// for the operation and both recording and queries are no-ops.
#[derive(Debug, Clone, Default)]
pub enum MetricsHandle {
    /// Metrics collection is disabled; recording does nothing.
    #[default]
    Disabled,
    /// Metrics collection is enabled for this operation.
    Enabled(std::sync::Arc<OperationMetrics>),
}

impl MetricsHandle {
    /// Report one policy event. No-op when disabled.
    pub fn record(&self, event: PolicyEvent) {
        if let MetricsHandle::Enabled(metrics) = self {
            metrics.record(event);
        }
    }

    /// Whether events are being collected.
    pub fn is_enabled(&self) -> bool {
        matches!(self, MetricsHandle::Enabled(_))
    }

    /// Snapshot the operation's metrics; `None` when disabled.
    pub fn snapshot(&self) -> Option<MetricsSnapshot> {
        match self {
            MetricsHandle::Disabled => None,
            MetricsHandle::Enabled(metrics) => Some(metrics.snapshot()),
        }
    }
}
