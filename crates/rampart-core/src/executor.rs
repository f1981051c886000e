//! The policy composer: engine and per-operation handles.
//!
//! [`Rampart`] owns the metrics registry and the per-operation shared state.
//! Registering an operation resolves its [`OperationProfile`] once and hands
//! back a cloneable [`ProtectedOperation`]; every handle for the same key
//! shares the same breaker window and bulkhead semaphores.
//!
//! An invocation threads through the policies innermost-out:
//! the bulkhead admits it, the timeout bounds it, the circuit breaker
//! accounts for it per attempt, the retry loop re-runs the whole attempt,
//! and the fallback resolves whatever terminal failure is left.

use std::future::Future;
use std::sync::Arc;

use rampart_metrics::{BreakerMode, MetricsHandle, MetricsRegistry, MetricsSnapshot, PolicyEvent};
use tracing::debug;

use crate::config::OperationProfile;
use crate::error::{FaultError, FaultResult};
use crate::invocation::{CallOptions, Invocation};
use crate::policy::circuit_breaker::Admission;
use crate::policy::{bulkhead, fallback, retry, timeout};
use crate::registry::{OperationState, SharedStateRegistry};

/// The fault-tolerance engine.
///
/// One per process (or per isolated domain); operations registered under the
/// same key share circuit breaker and bulkhead state across all handles.
#[derive(Debug)]
pub struct Rampart {
    metrics: Arc<MetricsRegistry>,
    states: SharedStateRegistry,
}

impl Rampart {
    /// Engine with metrics collection enabled.
    pub fn new() -> Self {
        Self::with_metrics(true)
    }

    /// Engine with metrics collection switched on or off process-wide.
    ///
    /// With metrics off, no counters are ever materialized and every metrics
    /// query reports absent.
    pub fn with_metrics(enabled: bool) -> Self {
        Self {
            metrics: Arc::new(MetricsRegistry::new(enabled)),
            states: SharedStateRegistry::new(),
        }
    }

    /// The metrics query surface.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Register a protected operation.
    ///
    /// The profile is resolved once, here; it is immutable for the
    /// operation's lifetime. Registering an already-known key returns a
    /// handle onto the existing shared state.
    pub fn operation<T, E>(
        &self,
        name: impl Into<String>,
        profile: OperationProfile<T, E>,
    ) -> ProtectedOperation<T, E> {
        let name = name.into();
        let state = self.states.get_or_create(
            &name,
            profile.circuit_breaker.as_ref().map(|config| &config.settings),
            profile.bulkhead.as_ref(),
        );
        let metrics = self.metrics.handle(&name);
        ProtectedOperation {
            name: Arc::from(name),
            profile: Arc::new(profile),
            state,
            metrics,
        }
    }
}

impl Default for Rampart {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for invoking one protected operation.
///
/// Cheap to clone; all clones share the operation's breaker, bulkhead and
/// metrics.
pub struct ProtectedOperation<T, E> {
    name: Arc<str>,
    profile: Arc<OperationProfile<T, E>>,
    state: Arc<OperationState>,
    metrics: MetricsHandle,
}

impl<T, E> Clone for ProtectedOperation<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            profile: self.profile.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for ProtectedOperation<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedOperation")
            .field("name", &self.name)
            .finish()
    }
}

impl<T, E> ProtectedOperation<T, E> {
    /// Stable identity of this operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current breaker mode, if a circuit breaker is configured.
    pub fn breaker_mode(&self) -> Option<BreakerMode> {
        self.state.breaker.as_ref().map(|breaker| breaker.mode())
    }

    /// Force the breaker back to CLOSED with an empty window.
    pub fn reset_breaker(&self) {
        if let Some(breaker) = &self.state.breaker {
            breaker.reset(&self.metrics);
        }
    }

    /// Calls currently holding a bulkhead execution slot.
    pub fn executing(&self) -> Option<u32> {
        self.state.bulkhead.as_ref().map(|bulkhead| bulkhead.executing())
    }

    /// Calls currently waiting in the bulkhead queue.
    pub fn queued(&self) -> Option<u32> {
        self.state.bulkhead.as_ref().map(|bulkhead| bulkhead.queued())
    }

    /// Snapshot of this operation's metrics; `None` when metrics are
    /// disabled.
    pub fn metrics_snapshot(&self) -> Option<MetricsSnapshot> {
        self.metrics.snapshot()
    }

    /// Invoke the operation through the configured policy chain.
    pub async fn invoke<F, Fut>(&self, operation: F) -> FaultResult<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Send,
    {
        self.invoke_with(operation, CallOptions::new()).await
    }

    /// Invoke with per-call options (cancellation, fallback filter
    /// overrides).
    pub async fn invoke_with<F, Fut>(
        &self,
        operation: F,
        options: CallOptions<E>,
    ) -> FaultResult<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Send,
    {
        let CallOptions {
            cancellation,
            fallback_apply_on,
            fallback_skip_on,
        } = options;
        let invocation = Invocation::new(self.name.clone(), cancellation.unwrap_or_default());

        let chain = async {
            match &self.profile.retry {
                Some(retry_config) => {
                    retry::execute(retry_config, &invocation, &self.metrics, || {
                        self.attempt(&invocation, &operation)
                    })
                    .await
                }
                None => self.attempt(&invocation, &operation).await,
            }
        };

        let outcome = match &self.profile.fallback {
            Some(fallback_config) => {
                let terminal = chain.await;
                fallback::resolve(
                    fallback_config,
                    fallback_apply_on.as_ref(),
                    fallback_skip_on.as_ref(),
                    &invocation,
                    &self.metrics,
                    terminal,
                )
                .await
            }
            None => chain.await,
        };

        self.metrics.record(PolicyEvent::InvocationFinished {
            failed: outcome.is_err(),
        });
        outcome
    }

    /// One attempt: breaker admission, then the timed, bulkheaded call.
    async fn attempt<F, Fut>(&self, invocation: &Invocation, operation: &F) -> FaultResult<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Send,
    {
        if invocation.is_cancelled() {
            return Err(FaultError::Cancelled {
                operation: invocation.operation_name(),
            });
        }

        let permit = match &self.state.breaker {
            Some(breaker) => match breaker.try_admit(&self.metrics) {
                Admission::Admitted(permit) => Some(permit),
                Admission::Rejected { retry_after } => {
                    debug!(
                        operation = %invocation.operation(),
                        "circuit breaker prevented call"
                    );
                    return Err(FaultError::CircuitBreakerOpen {
                        operation: invocation.operation_name(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    });
                }
            },
            None => None,
        };

        let guarded = self.guarded_call(invocation, operation);
        let outcome = match &self.profile.timeout {
            Some(timeout_settings) => {
                timeout::execute(timeout_settings, invocation, &self.metrics, guarded).await
            }
            None => guarded.await,
        };

        if let Some(permit) = permit {
            match &outcome {
                Ok(_) => permit.succeed(&self.metrics),
                // A cancelled call never completed; it is no outcome at all.
                Err(error) if error.is_cancelled() => drop(permit),
                Err(error) => {
                    let counts_as_failure = self
                        .profile
                        .circuit_breaker
                        .as_ref()
                        .map_or(true, |config| config.fail_on.matches(error));
                    if counts_as_failure {
                        permit.fail(&self.metrics);
                    } else {
                        permit.succeed(&self.metrics);
                    }
                }
            }
        }
        outcome
    }

    /// The innermost stage: bulkhead admission around the raw operation,
    /// raced against external cancellation.
    async fn guarded_call<F, Fut>(
        &self,
        invocation: &Invocation,
        operation: &F,
    ) -> FaultResult<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Send,
    {
        let _slot = match &self.state.bulkhead {
            Some(bulkhead_state) => {
                Some(bulkhead::acquire(bulkhead_state, invocation, &self.metrics).await?)
            }
            None => None,
        };

        tokio::select! {
            biased;
            result = operation() => result.map_err(FaultError::Execution),
            _ = invocation.cancelled() => Err(FaultError::Cancelled {
                operation: invocation.operation_name(),
            }),
        }
    }
}
