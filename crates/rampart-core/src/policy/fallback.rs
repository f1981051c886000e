//! Fallback policy.
//!
//! Wraps the whole chain for one call. A terminal failure is handed to the
//! configured handler when it matches the effective `apply_on` filter and
//! not the effective `skip_on` filter (skip wins when both match; per-call
//! overrides replace the profile's filters wholesale). Cancellation is never
//! handled. Every handler invocation counts one fallback call, whether or
//! not the handler itself succeeds.

use rampart_metrics::{MetricsHandle, PolicyEvent};
use tracing::debug;

use crate::config::{ErrorFilter, FallbackConfig};
use crate::error::{FaultError, FaultResult};
use crate::invocation::Invocation;

/// Resolve a terminal chain outcome through the fallback.
pub(crate) async fn resolve<T, E>(
    config: &FallbackConfig<T, E>,
    apply_override: Option<&ErrorFilter<E>>,
    skip_override: Option<&ErrorFilter<E>>,
    invocation: &Invocation,
    metrics: &MetricsHandle,
    outcome: FaultResult<T, E>,
) -> FaultResult<T, E> {
    let error = match outcome {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };
    if error.is_cancelled() {
        return Err(error);
    }

    let apply_on = apply_override.unwrap_or(&config.apply_on);
    let skip_on = skip_override.unwrap_or(&config.skip_on);
    if skip_on.matches(&error) || !apply_on.matches(&error) {
        return Err(error);
    }

    debug!(
        operation = %invocation.operation(),
        "invoking fallback for terminal failure"
    );
    metrics.record(PolicyEvent::FallbackApplied);
    (config.handler)(error).await.map_err(FaultError::Execution)
}
