//! Circuit breaker policy.
//!
//! One [`BreakerState`] exists per protected operation and is shared by all
//! of its invocations. Every state transition and rolling-window update
//! happens under a single mutex, so the order of updates is total across
//! concurrent callers. The critical sections never await.
//!
//! The rolling window holds the last `request_volume_threshold` outcomes;
//! the failure ratio is only evaluated once the window is full. OPEN admits
//! a trial at exactly `open_duration_ms` after opening (`>=`, so the
//! boundary instant itself is admitted). HALF_OPEN allows at most
//! `success_threshold` trials in flight; a full run of consecutive trial
//! successes recloses, any counting trial failure reopens and restarts the
//! open timer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rampart_metrics::{BreakerCallOutcome, BreakerMode, MetricsHandle, PolicyEvent};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::CircuitBreakerSettings;

/// Shared breaker state for one protected operation.
#[derive(Debug)]
pub(crate) struct BreakerState {
    operation: String,
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug)]
struct BreakerInner {
    mode: BreakerMode,
    entered_at: Instant,
    /// Last N outcomes while CLOSED; true = success.
    window: VecDeque<bool>,
    consecutive_successes: u32,
    trials_in_flight: u32,
    /// Bumped on every transition so that outcomes of calls admitted in an
    /// earlier breaker phase cannot corrupt the current one.
    generation: u64,
}

/// Admission decision for one call.
pub(crate) enum Admission {
    /// The call may execute; settle the permit with the outcome.
    Admitted(CallPermit),
    /// The breaker is shedding load; fail fast.
    Rejected {
        /// Time until the next trial admission.
        retry_after: Duration,
    },
}

/// Obligation to report the admitted call's outcome back to the breaker.
///
/// Dropping an unsettled permit (the call was abandoned mid-flight) releases
/// a held trial slot without recording an outcome.
pub(crate) struct CallPermit {
    state: Arc<BreakerState>,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl CallPermit {
    /// The call counted as a success against the breaker.
    pub(crate) fn succeed(mut self, metrics: &MetricsHandle) {
        self.settled = true;
        self.state.settle(self.trial, self.generation, true, metrics);
    }

    /// The call counted as a failure against the breaker.
    pub(crate) fn fail(mut self, metrics: &MetricsHandle) {
        self.settled = true;
        self.state.settle(self.trial, self.generation, false, metrics);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.state.abandon(self.trial, self.generation);
        }
    }
}

impl BreakerState {
    pub(crate) fn new(operation: &str, settings: CircuitBreakerSettings) -> Self {
        let window_capacity = settings.request_volume_threshold.max(1) as usize;
        Self {
            operation: operation.to_string(),
            settings,
            inner: Mutex::new(BreakerInner {
                mode: BreakerMode::Closed,
                entered_at: Instant::now(),
                window: VecDeque::with_capacity(window_capacity),
                consecutive_successes: 0,
                trials_in_flight: 0,
                generation: 0,
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current mode, for introspection.
    pub(crate) fn mode(&self) -> BreakerMode {
        self.lock_inner().mode
    }

    /// Decide whether a call may pass through right now.
    pub(crate) fn try_admit(self: &Arc<Self>, metrics: &MetricsHandle) -> Admission {
        let mut inner = self.lock_inner();
        match inner.mode {
            BreakerMode::Closed => Admission::Admitted(self.permit(&inner, false)),
            BreakerMode::Open => {
                let open_duration = Duration::from_millis(self.settings.open_duration_ms);
                let open_for = inner.entered_at.elapsed();
                if open_for >= open_duration {
                    self.transition(&mut inner, metrics, BreakerMode::HalfOpen);
                    inner.trials_in_flight = 1;
                    debug!(operation = %self.operation, "circuit breaker admitting trial call");
                    Admission::Admitted(self.permit(&inner, true))
                } else {
                    metrics.record(PolicyEvent::BreakerCallFinished {
                        outcome: BreakerCallOutcome::Prevented,
                    });
                    Admission::Rejected {
                        retry_after: open_duration - open_for,
                    }
                }
            }
            BreakerMode::HalfOpen => {
                if inner.trials_in_flight < self.settings.success_threshold {
                    inner.trials_in_flight += 1;
                    Admission::Admitted(self.permit(&inner, true))
                } else {
                    metrics.record(PolicyEvent::BreakerCallFinished {
                        outcome: BreakerCallOutcome::Prevented,
                    });
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                }
            }
        }
    }

    /// Force the breaker back to CLOSED with an empty window.
    pub(crate) fn reset(&self, metrics: &MetricsHandle) {
        let mut inner = self.lock_inner();
        if inner.mode == BreakerMode::Closed {
            inner.window.clear();
            inner.consecutive_successes = 0;
        } else {
            self.transition(&mut inner, metrics, BreakerMode::Closed);
        }
    }

    fn permit(self: &Arc<Self>, inner: &BreakerInner, trial: bool) -> CallPermit {
        CallPermit {
            state: self.clone(),
            trial,
            generation: inner.generation,
            settled: false,
        }
    }

    fn settle(
        &self,
        trial: bool,
        generation: u64,
        success: bool,
        metrics: &MetricsHandle,
    ) {
        metrics.record(PolicyEvent::BreakerCallFinished {
            outcome: if success {
                BreakerCallOutcome::Succeeded
            } else {
                BreakerCallOutcome::Failed
            },
        });

        let mut inner = self.lock_inner();
        if inner.generation != generation {
            // Outcome of a call admitted in an earlier phase; the state has
            // already moved on.
            return;
        }
        match inner.mode {
            BreakerMode::Closed => {
                self.push_outcome(&mut inner, success);
                self.evaluate_window(&mut inner, metrics);
            }
            BreakerMode::HalfOpen if trial => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                if success {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.settings.success_threshold {
                        self.transition(&mut inner, metrics, BreakerMode::Closed);
                    }
                } else {
                    self.transition(&mut inner, metrics, BreakerMode::Open);
                }
            }
            _ => {}
        }
    }

    fn abandon(&self, trial: bool, generation: u64) {
        if !trial {
            return;
        }
        let mut inner = self.lock_inner();
        if inner.generation == generation {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn push_outcome(&self, inner: &mut BreakerInner, success: bool) {
        let capacity = self.settings.request_volume_threshold.max(1) as usize;
        while inner.window.len() >= capacity {
            inner.window.pop_front();
        }
        inner.window.push_back(success);
    }

    fn evaluate_window(&self, inner: &mut BreakerInner, metrics: &MetricsHandle) {
        let volume = self.settings.request_volume_threshold.max(1) as usize;
        if inner.window.len() < volume {
            return;
        }
        let failures = inner.window.iter().filter(|ok| !**ok).count();
        let ratio = failures as f64 / inner.window.len() as f64;
        if ratio >= self.settings.failure_ratio {
            self.transition(inner, metrics, BreakerMode::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, metrics: &MetricsHandle, to: BreakerMode) {
        let from = inner.mode;
        metrics.record(PolicyEvent::BreakerStateDwell {
            mode: from,
            dwell: inner.entered_at.elapsed(),
        });
        if from == BreakerMode::Closed && to == BreakerMode::Open {
            metrics.record(PolicyEvent::BreakerOpened);
        }
        info!(
            operation = %self.operation,
            from = %from,
            to = %to,
            "circuit breaker transition"
        );
        inner.mode = to;
        inner.entered_at = Instant::now();
        inner.generation += 1;
        inner.consecutive_successes = 0;
        inner.trials_in_flight = 0;
        if to == BreakerMode::Closed {
            inner.window.clear();
        }
    }
}
