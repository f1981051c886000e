//! Structured events reported by policies after each decision point.
//!
//! Events are plain copyable values; the policies fire them and forget them.
//! The recorder alone decides which counters they move.

use std::time::Duration;

/// Circuit breaker mode, as reported in events and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerMode {
    /// Requests pass through; outcomes are recorded in the rolling window.
    Closed,
    /// Requests are rejected without invoking the wrapped chain.
    Open,
    /// A limited number of trial requests probe for recovery.
    HalfOpen,
}

impl std::fmt::Display for BreakerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerMode::Closed => write!(f, "CLOSED"),
            BreakerMode::Open => write!(f, "OPEN"),
            BreakerMode::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Classification of a completed retry-guarded invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The first attempt succeeded; no retry was consumed.
    SucceededNotRetried,
    /// At least one retry was consumed before success.
    SucceededRetried,
    /// The retry budget was exhausted or the failure was not retryable.
    Failed,
}

/// Outcome of one call as seen by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCallOutcome {
    /// The call completed and counted as a success against the breaker.
    Succeeded,
    /// The call completed and counted as a failure against the breaker.
    Failed,
    /// The call was rejected without execution because the breaker was open.
    Prevented,
}

/// A single policy decision, reported to the recorder after the fact.
#[derive(Debug, Clone, Copy)]
pub enum PolicyEvent {
    /// The whole invocation finished at the outermost boundary.
    InvocationFinished {
        /// Whether a terminal failure reached the caller.
        failed: bool,
    },

    /// One retry was consumed (not counted for the first attempt).
    RetryAttempted,
    /// The retry policy classified the finished invocation.
    RetryFinished {
        /// How the retry-guarded chain ended.
        outcome: RetryOutcome,
    },

    /// The timeout policy resolved the deadline race.
    TimeoutFinished {
        /// Whether the deadline fired before natural completion.
        timed_out: bool,
        /// Time spent in the guarded call, up to the deadline.
        duration: Duration,
    },

    /// The breaker observed a call outcome (or prevented the call).
    BreakerCallFinished {
        /// Success, failure, or fast rejection.
        outcome: BreakerCallOutcome,
    },
    /// The breaker moved from CLOSED to OPEN.
    BreakerOpened,
    /// The breaker left a state after dwelling in it.
    BreakerStateDwell {
        /// The state being left.
        mode: BreakerMode,
        /// Time spent in that state.
        dwell: Duration,
    },

    /// The bulkhead admitted a call into an execution slot.
    BulkheadAccepted,
    /// The bulkhead rejected a call (capacity and queue both full).
    BulkheadRejected,
    /// A call started executing inside the bulkhead.
    BulkheadEntered,
    /// A call left its execution slot.
    BulkheadExited {
        /// Time the slot was held.
        duration: Duration,
    },
    /// A call joined the waiting queue.
    BulkheadQueued,
    /// A call left the waiting queue.
    BulkheadDequeued {
        /// Time spent queued.
        waited: Duration,
        /// Whether the waiter was admitted (false: abandoned by its caller).
        admitted: bool,
    },

    /// The fallback handler was invoked for a terminal failure.
    FallbackApplied,
}
