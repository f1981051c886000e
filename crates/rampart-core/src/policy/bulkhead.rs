//! Bulkhead policy.
//!
//! Admission is a pair of semaphores: `execution_slots` holds `capacity`
//! permits, `queue_slots` (present only when queueing is configured) holds
//! `queue_size`. A caller that cannot take an execution slot immediately
//! takes a queue slot and waits on the fair execution semaphore; tokio
//! hands permits to waiters in FIFO order, so queued calls are admitted in
//! arrival order. A caller that can take neither is rejected at once.
//!
//! Both the queue position and the execution slot are released by guard
//! drop, so a caller that is cancelled (or abandoned by an enclosing
//! deadline) at any point releases whatever it held, and an abandoned
//! waiter is counted neither as accepted nor as rejected.

use std::sync::Arc;

use rampart_metrics::{MetricsHandle, PolicyEvent};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BulkheadSettings;
use crate::error::FaultError;
use crate::invocation::Invocation;

/// Shared bulkhead state for one protected operation.
#[derive(Debug)]
pub(crate) struct BulkheadState {
    capacity: u32,
    queue_capacity: u32,
    execution_slots: Arc<Semaphore>,
    queue_slots: Option<Arc<Semaphore>>,
}

impl BulkheadState {
    pub(crate) fn new(settings: &BulkheadSettings) -> Self {
        Self {
            capacity: settings.capacity,
            queue_capacity: settings.queue_size,
            execution_slots: Arc::new(Semaphore::new(settings.capacity as usize)),
            queue_slots: (settings.queue_size > 0)
                .then(|| Arc::new(Semaphore::new(settings.queue_size as usize))),
        }
    }

    /// Calls currently holding an execution slot.
    pub(crate) fn executing(&self) -> u32 {
        self.capacity
            .saturating_sub(self.execution_slots.available_permits() as u32)
    }

    /// Calls currently waiting for an execution slot.
    pub(crate) fn queued(&self) -> u32 {
        match &self.queue_slots {
            Some(slots) => self
                .queue_capacity
                .saturating_sub(slots.available_permits() as u32),
            None => 0,
        }
    }

    fn rejection<E>(&self, invocation: &Invocation) -> FaultError<E> {
        warn!(
            operation = %invocation.operation(),
            capacity = self.capacity,
            queue_capacity = self.queue_capacity,
            "bulkhead rejected call at capacity"
        );
        FaultError::BulkheadFull {
            operation: invocation.operation_name(),
            capacity: self.capacity,
            queue_capacity: self.queue_capacity,
        }
    }
}

/// Held execution slot; releasing it records the execution duration and
/// moves the concurrency gauge back down.
pub(crate) struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    metrics: MetricsHandle,
    entered: Instant,
}

impl SlotGuard {
    fn new(permit: OwnedSemaphorePermit, metrics: &MetricsHandle) -> Self {
        metrics.record(PolicyEvent::BulkheadAccepted);
        metrics.record(PolicyEvent::BulkheadEntered);
        Self {
            _permit: permit,
            metrics: metrics.clone(),
            entered: Instant::now(),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.metrics.record(PolicyEvent::BulkheadExited {
            duration: self.entered.elapsed(),
        });
    }
}

/// Held queue position; dropping it before `admitted()` marks the waiter as
/// abandoned (gauge movement only, no wait-time sample).
struct QueueToken {
    _slot: OwnedSemaphorePermit,
    metrics: MetricsHandle,
    since: Instant,
    admitted: bool,
}

impl QueueToken {
    fn new(slot: OwnedSemaphorePermit, metrics: &MetricsHandle) -> Self {
        metrics.record(PolicyEvent::BulkheadQueued);
        Self {
            _slot: slot,
            metrics: metrics.clone(),
            since: Instant::now(),
            admitted: false,
        }
    }

    fn admitted(mut self) {
        self.admitted = true;
    }
}

impl Drop for QueueToken {
    fn drop(&mut self) {
        self.metrics.record(PolicyEvent::BulkheadDequeued {
            waited: self.since.elapsed(),
            admitted: self.admitted,
        });
    }
}

/// Admit the invocation into an execution slot, queueing if configured.
pub(crate) async fn acquire<E>(
    state: &BulkheadState,
    invocation: &Invocation,
    metrics: &MetricsHandle,
) -> Result<SlotGuard, FaultError<E>> {
    if let Ok(permit) = state.execution_slots.clone().try_acquire_owned() {
        return Ok(SlotGuard::new(permit, metrics));
    }

    let Some(queue_slots) = &state.queue_slots else {
        metrics.record(PolicyEvent::BulkheadRejected);
        return Err(state.rejection(invocation));
    };
    let Ok(queue_slot) = queue_slots.clone().try_acquire_owned() else {
        metrics.record(PolicyEvent::BulkheadRejected);
        return Err(state.rejection(invocation));
    };

    let token = QueueToken::new(queue_slot, metrics);
    debug!(
        operation = %invocation.operation(),
        queued = state.queued(),
        "bulkhead queueing call"
    );

    tokio::select! {
        biased;
        permit = state.execution_slots.clone().acquire_owned() => {
            match permit {
                Ok(permit) => {
                    token.admitted();
                    Ok(SlotGuard::new(permit, metrics))
                }
                // The semaphore is never closed while the state is alive.
                Err(_) => {
                    drop(token);
                    Err(state.rejection(invocation))
                }
            }
        }
        _ = invocation.cancelled() => {
            drop(token);
            Err(FaultError::Cancelled {
                operation: invocation.operation_name(),
            })
        }
    }
}
