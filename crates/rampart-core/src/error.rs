//! Error types for the Rampart engine.
//!
//! Every failure a policy can surface is a variant here; the operation's own
//! domain failures travel through unchanged as [`FaultError::Execution`].

use thiserror::Error;

/// Failure kinds surfaced to callers of a protected operation.
#[derive(Error, Debug)]
pub enum FaultError<E> {
    /// The deadline elapsed before the guarded call completed
    #[error("'{operation}' timed out after {after_ms}ms")]
    TimedOut {
        /// Operation being protected
        operation: String,
        /// Configured deadline in milliseconds
        after_ms: u64,
    },

    /// The circuit breaker rejected the call without executing it
    #[error("circuit breaker open for '{operation}'; retry after {retry_after_ms}ms")]
    CircuitBreakerOpen {
        /// Operation being protected
        operation: String,
        /// Time until the breaker next admits a trial call, in milliseconds
        retry_after_ms: u64,
    },

    /// The bulkhead was at capacity and the queue (if any) was full
    #[error("bulkhead full for '{operation}': {capacity} executing, {queue_capacity} queue slots")]
    BulkheadFull {
        /// Operation being protected
        operation: String,
        /// Maximum concurrent executions
        capacity: u32,
        /// Configured queue capacity (0 when queueing is disabled)
        queue_capacity: u32,
    },

    /// The caller cancelled the invocation before it completed
    #[error("invocation of '{operation}' was cancelled")]
    Cancelled {
        /// Operation being protected
        operation: String,
    },

    /// The operation itself failed; its error is propagated unchanged
    #[error("execution failed: {0}")]
    Execution(E),
}

impl<E> FaultError<E> {
    /// Whether this failure is an external cancellation.
    ///
    /// Cancelled invocations are never retried and never fall back.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FaultError::Cancelled { .. })
    }

    /// The domain failure, if this is an execution failure.
    pub fn as_execution(&self) -> Option<&E> {
        match self {
            FaultError::Execution(error) => Some(error),
            _ => None,
        }
    }

    /// Unwrap into the domain failure, if this is an execution failure.
    pub fn into_execution(self) -> Option<E> {
        match self {
            FaultError::Execution(error) => Some(error),
            _ => None,
        }
    }
}

/// Result type for protected invocations.
pub type FaultResult<T, E> = Result<T, FaultError<E>>;
