//! Per-call invocation context and per-call options.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ErrorFilter;

/// Context for a single call through the policy chain.
///
/// Shared by reference across the policies of one invocation; everything in
/// here is private to the call except the cancellation token, which the
/// caller may hold a clone of.
#[derive(Debug, Clone)]
pub struct Invocation {
    operation: Arc<str>,
    cancel: CancellationToken,
    started: Instant,
}

impl Invocation {
    pub(crate) fn new(operation: Arc<str>, cancel: CancellationToken) -> Self {
        Self {
            operation,
            cancel,
            started: Instant::now(),
        }
    }

    /// Stable identity of the protected operation.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// When the invocation entered the engine.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Whether the caller has cancelled the invocation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the caller cancels the invocation.
    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn operation_name(&self) -> String {
        self.operation.to_string()
    }
}

/// Per-call overrides and signals.
///
/// Everything here defaults to "use the operation's registered profile";
/// per-call fallback filters take precedence over the profile's, with
/// skip-over-apply precedence unchanged.
pub struct CallOptions<E> {
    /// External cancellation signal for this call
    pub cancellation: Option<CancellationToken>,
    /// Per-call override of the fallback `apply_on` filter
    pub fallback_apply_on: Option<ErrorFilter<E>>,
    /// Per-call override of the fallback `skip_on` filter
    pub fallback_skip_on: Option<ErrorFilter<E>>,
}

impl<E> CallOptions<E> {
    /// Options that defer entirely to the operation profile.
    pub fn new() -> Self {
        Self {
            cancellation: None,
            fallback_apply_on: None,
            fallback_skip_on: None,
        }
    }

    /// Attach a cancellation token the caller controls.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Override the fallback `apply_on` filter for this call.
    pub fn with_fallback_apply_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.fallback_apply_on = Some(filter);
        self
    }

    /// Override the fallback `skip_on` filter for this call.
    pub fn with_fallback_skip_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.fallback_skip_on = Some(filter);
        self
    }
}

impl<E> Default for CallOptions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for CallOptions<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("cancellation", &self.cancellation)
            .field("fallback_apply_on", &self.fallback_apply_on)
            .field("fallback_skip_on", &self.fallback_skip_on)
            .finish()
    }
}
