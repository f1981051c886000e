//! Per-operation shared policy state.
//!
//! Circuit breaker and bulkhead state are the only things shared across
//! concurrent invocations of one operation. They live here, keyed by
//! operation identity in a concurrent map, so contention stays scoped to a
//! single operation and there is no global lock.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{BulkheadSettings, CircuitBreakerSettings};
use crate::policy::bulkhead::BulkheadState;
use crate::policy::circuit_breaker::BreakerState;

/// The shared mutable state of one protected operation.
#[derive(Debug)]
pub(crate) struct OperationState {
    pub(crate) breaker: Option<Arc<BreakerState>>,
    pub(crate) bulkhead: Option<Arc<BulkheadState>>,
}

/// Operation-keyed store of shared policy state.
#[derive(Debug, Default)]
pub(crate) struct SharedStateRegistry {
    states: DashMap<String, Arc<OperationState>>,
}

impl SharedStateRegistry {
    pub(crate) fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// State for `operation`, created from the given settings on first
    /// registration. Later registrations of the same key share the first
    /// registration's state; configuration is resolved once per operation.
    pub(crate) fn get_or_create(
        &self,
        operation: &str,
        breaker: Option<&CircuitBreakerSettings>,
        bulkhead: Option<&BulkheadSettings>,
    ) -> Arc<OperationState> {
        if let Some(state) = self.states.get(operation) {
            return state.clone();
        }
        let state = Arc::new(OperationState {
            breaker: breaker
                .map(|settings| Arc::new(BreakerState::new(operation, settings.clone()))),
            bulkhead: bulkhead.map(|settings| Arc::new(BulkheadState::new(settings))),
        });
        self.states
            .entry(operation.to_string())
            .or_insert(state)
            .clone()
    }
}
