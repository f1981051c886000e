//! Point-in-time snapshots and baseline deltas.
//!
//! Conformance-style callers snapshot an operation before a test window and
//! subtract afterwards; [`MetricsSnapshot::delta`] does the subtraction with
//! the right semantics per metric kind (counters subtract, gauges read
//! current, histogram bounds come from the later snapshot).

use std::time::Duration;

/// Summary of a duration histogram.
///
/// A histogram that exists but has never observed a sample has `count == 0`
/// and `min`/`max` of `None`; that is distinct from the histogram being
/// absent altogether (metrics disabled), which surfaces as `None` at the
/// query boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub total: Duration,
    /// Smallest observation, if any.
    pub min: Option<Duration>,
    /// Largest observation, if any.
    pub max: Option<Duration>,
}

impl HistogramSnapshot {
    /// Mean observation, if any samples were recorded.
    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        Some(self.total / u32::try_from(self.count).unwrap_or(u32::MAX))
    }
}

/// Every counter, gauge and histogram of one protected operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Invocations that reached the engine.
    pub invocations: u64,
    /// Invocations whose terminal failure reached the caller.
    pub invocations_failed: u64,

    /// Retries consumed (first attempts are not counted).
    pub retry_retries: u64,
    /// Invocations that succeeded on the first attempt.
    pub retry_calls_succeeded_not_retried: u64,
    /// Invocations that succeeded after at least one retry.
    pub retry_calls_succeeded_retried: u64,
    /// Invocations that exhausted the retry budget or hit a non-retryable failure.
    pub retry_calls_failed: u64,

    /// Calls cut off by the deadline.
    pub timeout_calls_timed_out: u64,
    /// Calls that completed before the deadline.
    pub timeout_calls_not_timed_out: u64,
    /// Guarded-call durations.
    pub timeout_execution_duration: HistogramSnapshot,

    /// Calls that counted as breaker successes.
    pub breaker_calls_succeeded: u64,
    /// Calls that counted as breaker failures.
    pub breaker_calls_failed: u64,
    /// Calls rejected while the breaker was open.
    pub breaker_calls_prevented: u64,
    /// CLOSED to OPEN transitions.
    pub breaker_opened: u64,
    /// Accumulated time spent CLOSED (flushed on transition).
    pub breaker_time_closed: Duration,
    /// Accumulated time spent OPEN (flushed on transition).
    pub breaker_time_open: Duration,
    /// Accumulated time spent HALF_OPEN (flushed on transition).
    pub breaker_time_half_open: Duration,

    /// Calls admitted into an execution slot.
    pub bulkhead_calls_accepted: u64,
    /// Calls rejected at capacity with no queue room.
    pub bulkhead_calls_rejected: u64,
    /// Instantaneous executing-call gauge.
    pub bulkhead_concurrent_executions: u64,
    /// Instantaneous queued-call gauge.
    pub bulkhead_queue_population: u64,
    /// Slot-hold durations.
    pub bulkhead_execution_duration: HistogramSnapshot,
    /// Queue wait durations (admitted waiters only).
    pub bulkhead_wait_time: HistogramSnapshot,

    /// Fallback handler invocations.
    pub fallback_calls: u64,
}

fn histogram_delta(current: HistogramSnapshot, baseline: HistogramSnapshot) -> HistogramSnapshot {
    HistogramSnapshot {
        count: current.count.saturating_sub(baseline.count),
        total: current.total.saturating_sub(baseline.total),
        min: current.min,
        max: current.max,
    }
}

impl MetricsSnapshot {
    /// Difference against an earlier baseline snapshot of the same operation.
    ///
    /// Counters and time accumulators subtract; the gauges keep their current
    /// instantaneous values since a gauge delta has no meaning across a test
    /// window.
    pub fn delta(&self, baseline: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.saturating_sub(baseline.invocations),
            invocations_failed: self
                .invocations_failed
                .saturating_sub(baseline.invocations_failed),
            retry_retries: self.retry_retries.saturating_sub(baseline.retry_retries),
            retry_calls_succeeded_not_retried: self
                .retry_calls_succeeded_not_retried
                .saturating_sub(baseline.retry_calls_succeeded_not_retried),
            retry_calls_succeeded_retried: self
                .retry_calls_succeeded_retried
                .saturating_sub(baseline.retry_calls_succeeded_retried),
            retry_calls_failed: self
                .retry_calls_failed
                .saturating_sub(baseline.retry_calls_failed),
            timeout_calls_timed_out: self
                .timeout_calls_timed_out
                .saturating_sub(baseline.timeout_calls_timed_out),
            timeout_calls_not_timed_out: self
                .timeout_calls_not_timed_out
                .saturating_sub(baseline.timeout_calls_not_timed_out),
            timeout_execution_duration: histogram_delta(
                self.timeout_execution_duration,
                baseline.timeout_execution_duration,
            ),
            breaker_calls_succeeded: self
                .breaker_calls_succeeded
                .saturating_sub(baseline.breaker_calls_succeeded),
            breaker_calls_failed: self
                .breaker_calls_failed
                .saturating_sub(baseline.breaker_calls_failed),
            breaker_calls_prevented: self
                .breaker_calls_prevented
                .saturating_sub(baseline.breaker_calls_prevented),
            breaker_opened: self.breaker_opened.saturating_sub(baseline.breaker_opened),
            breaker_time_closed: self
                .breaker_time_closed
                .saturating_sub(baseline.breaker_time_closed),
            breaker_time_open: self
                .breaker_time_open
                .saturating_sub(baseline.breaker_time_open),
            breaker_time_half_open: self
                .breaker_time_half_open
                .saturating_sub(baseline.breaker_time_half_open),
            bulkhead_calls_accepted: self
                .bulkhead_calls_accepted
                .saturating_sub(baseline.bulkhead_calls_accepted),
            bulkhead_calls_rejected: self
                .bulkhead_calls_rejected
                .saturating_sub(baseline.bulkhead_calls_rejected),
            bulkhead_concurrent_executions: self.bulkhead_concurrent_executions,
            bulkhead_queue_population: self.bulkhead_queue_population,
            bulkhead_execution_duration: histogram_delta(
                self.bulkhead_execution_duration,
                baseline.bulkhead_execution_duration,
            ),
            bulkhead_wait_time: histogram_delta(
                self.bulkhead_wait_time,
                baseline.bulkhead_wait_time,
            ),
            fallback_calls: self.fallback_calls.saturating_sub(baseline.fallback_calls),
        }
    }
}
