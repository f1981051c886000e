//! Per-operation policy configuration.
//!
//! Numeric settings are plain serde structs with millisecond durations and
//! per-field defaults, so profiles can be resolved from config files.
//! Error-class filters and fallback handlers are runtime values and live
//! alongside the settings in the typed configs; the whole
//! [`OperationProfile`] is resolved once at registration and is immutable
//! for the operation's lifetime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FaultError;

/// Boxed future returned by fallback handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Fallback handler: receives the triggering failure, produces a substitute.
pub type FallbackFn<T, E> = Arc<dyn Fn(FaultError<E>) -> BoxFuture<Result<T, E>> + Send + Sync>;

/// A closed predicate over failure kinds, used by the retryOn/abortOn,
/// failOn and applyOn/skipOn filters.
pub struct ErrorFilter<E> {
    kind: FilterKind<E>,
}

enum FilterKind<E> {
    Any,
    None,
    Predicate(Arc<dyn Fn(&FaultError<E>) -> bool + Send + Sync>),
}

impl<E> ErrorFilter<E> {
    /// Matches every failure.
    pub fn any() -> Self {
        Self {
            kind: FilterKind::Any,
        }
    }

    /// Matches no failure.
    pub fn none() -> Self {
        Self {
            kind: FilterKind::None,
        }
    }

    /// Matches failures selected by the predicate.
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&FaultError<E>) -> bool + Send + Sync + 'static,
    {
        Self {
            kind: FilterKind::Predicate(Arc::new(predicate)),
        }
    }

    /// Evaluate the filter against a failure.
    pub fn matches(&self, error: &FaultError<E>) -> bool {
        match &self.kind {
            FilterKind::Any => true,
            FilterKind::None => false,
            FilterKind::Predicate(predicate) => predicate(error),
        }
    }
}

impl<E> Clone for ErrorFilter<E> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            FilterKind::Any => FilterKind::Any,
            FilterKind::None => FilterKind::None,
            FilterKind::Predicate(predicate) => FilterKind::Predicate(predicate.clone()),
        };
        Self { kind }
    }
}

impl<E> std::fmt::Debug for ErrorFilter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match &self.kind {
            FilterKind::Any => "any",
            FilterKind::None => "none",
            FilterKind::Predicate(_) => "predicate",
        };
        f.debug_tuple("ErrorFilter").field(&name).finish()
    }
}

/// Timeout policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Deadline for the guarded call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum retries after the first attempt; `None` means unlimited
    /// (bounded only by `max_duration_ms`)
    #[serde(default = "default_max_retries")]
    pub max_retries: Option<u32>,

    /// Fixed delay between attempts in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Jitter range in milliseconds; each attempt's delay is drawn uniformly
    /// from `delay_ms ± jitter_ms`, clamped at zero
    #[serde(default)]
    pub jitter_ms: u64,

    /// Upper bound on total time spent retrying, in milliseconds
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: 0,
            jitter_ms: 0,
            max_duration_ms: None,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Rolling window size; the failure ratio is only evaluated once this
    /// many outcomes have been recorded
    #[serde(default = "default_request_volume_threshold")]
    pub request_volume_threshold: u32,

    /// Failure ratio (0.0-1.0) at or above which the breaker opens
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,

    /// Time to stay OPEN before admitting a trial call, in milliseconds
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,

    /// Consecutive trial successes required to close from HALF_OPEN; also
    /// caps the number of concurrent trial calls
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            request_volume_threshold: default_request_volume_threshold(),
            failure_ratio: default_failure_ratio(),
            open_duration_ms: default_open_duration_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Bulkhead settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadSettings {
    /// Maximum concurrent executions
    #[serde(default = "default_bulkhead_capacity")]
    pub capacity: u32,

    /// Waiting-queue capacity; 0 disables queueing and rejects at capacity
    #[serde(default)]
    pub queue_size: u32,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            capacity: default_bulkhead_capacity(),
            queue_size: 0,
        }
    }
}

// Default values
fn default_timeout_ms() -> u64 {
    1000
}
fn default_max_retries() -> Option<u32> {
    Some(3)
}
fn default_request_volume_threshold() -> u32 {
    20
}
fn default_failure_ratio() -> f64 {
    0.5
}
fn default_open_duration_ms() -> u64 {
    5000
}
fn default_success_threshold() -> u32 {
    1
}
fn default_bulkhead_capacity() -> u32 {
    10
}

/// Retry settings plus the retryable/abort failure filters.
///
/// `abort_on` takes precedence: a failure matched by both filters is not
/// retried.
#[derive(Debug)]
pub struct RetryConfig<E> {
    /// Numeric retry settings
    pub settings: RetrySettings,
    /// Failures eligible for retry (default: all)
    pub retry_on: ErrorFilter<E>,
    /// Failures that abort retrying immediately (default: none)
    pub abort_on: ErrorFilter<E>,
}

impl<E> RetryConfig<E> {
    /// Retry config with default filters (retry everything, abort nothing).
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            retry_on: ErrorFilter::any(),
            abort_on: ErrorFilter::none(),
        }
    }

    /// Restrict which failures are retried.
    pub fn retry_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.retry_on = filter;
        self
    }

    /// Abort retrying on matching failures, regardless of `retry_on`.
    pub fn abort_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.abort_on = filter;
        self
    }

    /// Whether a failure should be retried under these filters.
    pub(crate) fn should_retry(&self, error: &FaultError<E>) -> bool {
        !self.abort_on.matches(error) && self.retry_on.matches(error)
    }
}

impl<E> Default for RetryConfig<E> {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            retry_on: self.retry_on.clone(),
            abort_on: self.abort_on.clone(),
        }
    }
}

/// Circuit breaker settings plus the failure-counting filter.
#[derive(Debug)]
pub struct CircuitBreakerConfig<E> {
    /// Numeric breaker settings
    pub settings: CircuitBreakerSettings,
    /// Failures that count against the rolling window (default: all).
    /// Excluded failures still propagate but count as breaker successes.
    pub fail_on: ErrorFilter<E>,
}

impl<E> CircuitBreakerConfig<E> {
    /// Breaker config counting every failure.
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            fail_on: ErrorFilter::any(),
        }
    }

    /// Restrict which failures count against the breaker.
    pub fn fail_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.fail_on = filter;
        self
    }
}

impl<E> Default for CircuitBreakerConfig<E> {
    fn default() -> Self {
        Self::new(CircuitBreakerSettings::default())
    }
}

impl<E> Clone for CircuitBreakerConfig<E> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            fail_on: self.fail_on.clone(),
        }
    }
}

/// Fallback handler plus its apply/skip filters.
///
/// `skip_on` takes precedence over `apply_on` when both match.
pub struct FallbackConfig<T, E> {
    /// Substitute producer, handed the triggering failure
    pub handler: FallbackFn<T, E>,
    /// Failures the fallback applies to (default: all)
    pub apply_on: ErrorFilter<E>,
    /// Failures the fallback never applies to (default: none)
    pub skip_on: ErrorFilter<E>,
}

impl<T, E> FallbackConfig<T, E> {
    /// Fallback invoking an async handler.
    pub fn from_fn<F, Fut>(handler: F) -> Self
    where
        F: Fn(FaultError<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: 'static,
        E: 'static,
    {
        Self {
            handler: Arc::new(move |error| Box::pin(handler(error))),
            apply_on: ErrorFilter::any(),
            skip_on: ErrorFilter::none(),
        }
    }

    /// Fallback substituting a fixed value.
    pub fn from_value(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
        E: 'static,
    {
        Self::from_fn(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Restrict which failures the fallback applies to.
    pub fn apply_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.apply_on = filter;
        self
    }

    /// Exclude failures from the fallback, regardless of `apply_on`.
    pub fn skip_on(mut self, filter: ErrorFilter<E>) -> Self {
        self.skip_on = filter;
        self
    }
}

impl<T, E> Clone for FallbackConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            apply_on: self.apply_on.clone(),
            skip_on: self.skip_on.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for FallbackConfig<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackConfig")
            .field("handler", &"<fallback fn>")
            .field("apply_on", &self.apply_on)
            .field("skip_on", &self.skip_on)
            .finish()
    }
}

/// The full policy configuration attached to one protected operation.
///
/// Every policy is optional; an empty profile is a raw pass-through.
#[derive(Debug)]
pub struct OperationProfile<T, E> {
    /// Timeout policy, if any
    pub timeout: Option<TimeoutSettings>,
    /// Retry policy, if any
    pub retry: Option<RetryConfig<E>>,
    /// Circuit breaker policy, if any
    pub circuit_breaker: Option<CircuitBreakerConfig<E>>,
    /// Bulkhead policy, if any
    pub bulkhead: Option<BulkheadSettings>,
    /// Fallback policy, if any
    pub fallback: Option<FallbackConfig<T, E>>,
}

impl<T, E> OperationProfile<T, E> {
    /// Empty profile: the operation runs unguarded.
    pub fn new() -> Self {
        Self {
            timeout: None,
            retry: None,
            circuit_breaker: None,
            bulkhead: None,
            fallback: None,
        }
    }

    /// Attach a timeout policy.
    pub fn with_timeout(mut self, settings: TimeoutSettings) -> Self {
        self.timeout = Some(settings);
        self
    }

    /// Attach a retry policy.
    pub fn with_retry(mut self, config: RetryConfig<E>) -> Self {
        self.retry = Some(config);
        self
    }

    /// Attach a circuit breaker policy.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig<E>) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Attach a bulkhead policy.
    pub fn with_bulkhead(mut self, settings: BulkheadSettings) -> Self {
        self.bulkhead = Some(settings);
        self
    }

    /// Attach a fallback policy.
    pub fn with_fallback(mut self, config: FallbackConfig<T, E>) -> Self {
        self.fallback = Some(config);
        self
    }
}

impl<T, E> Default for OperationProfile<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for OperationProfile<T, E> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout.clone(),
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            bulkhead: self.bulkhead.clone(),
            fallback: self.fallback.clone(),
        }
    }
}
