//!
//! Rampart Core - composable runtime fault tolerance for async operations
//!
//! Rampart wraps arbitrary async operations with resilience policies -
//! timeout, retry, circuit breaker, bulkhead and fallback - and records
//! every policy decision as per-operation metrics. Policies compose in a
//! fixed nesting with the bulkhead innermost:
//!
//! ```text
//! fallback( retry( circuit_breaker( timeout( bulkhead( operation ) ) ) ) )
//! ```
//!
//! Register an operation once with its [`OperationProfile`]; every handle
//! for the same key shares breaker and bulkhead state, so independent
//! callers are throttled together:
//!
//! ```no_run
//! use rampart_core::{Rampart, OperationProfile, RetryConfig, RetrySettings};
//!
//! # async fn example() {
//! let engine = Rampart::new();
//! let op = engine.operation(
//!     "payments.charge",
//!     OperationProfile::<String, String>::new()
//!         .with_retry(RetryConfig::new(RetrySettings::default())),
//! );
//! let result = op.invoke(|| async { Ok("charged".to_string()) }).await;
//! # let _ = result;
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Policy configuration
pub mod config;

/// Error types
pub mod error;

/// Engine and protected-operation handles
pub mod executor;

/// Invocation context and per-call options
pub mod invocation;

mod policy;
mod registry;

// Re-export key types
pub use config::{
    BulkheadSettings, CircuitBreakerConfig, CircuitBreakerSettings, ErrorFilter, FallbackConfig,
    OperationProfile, RetryConfig, RetrySettings, TimeoutSettings,
};
pub use error::{FaultError, FaultResult};
pub use executor::{ProtectedOperation, Rampart};
pub use invocation::{CallOptions, Invocation};

// Metrics surface, re-exported for callers that query counters
pub use rampart_metrics::{
    BreakerMode, HistogramSnapshot, MetricsRegistry, MetricsSnapshot,
};
