//! Operation-keyed metrics registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::recorder::{MetricsHandle, OperationMetrics};
use crate::snapshot::MetricsSnapshot;

/// Process-wide metrics store, keyed by operation identity.
///
/// The enabled flag is fixed at construction. When disabled, no counter set
/// is ever materialized for any operation: handles are inert and every query
/// answers `None`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    enabled: bool,
    operations: DashMap<String, Arc<OperationMetrics>>,
}

impl MetricsRegistry {
    /// Create a registry; `enabled = false` makes it a permanent no-op.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            operations: DashMap::new(),
        }
    }

    /// Whether metrics collection is on for this process.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Recording handle for one operation.
    ///
    /// Materializes the operation's counter set on first use so that every
    /// counter and histogram is present (at zero observations) from
    /// registration onwards.
    pub fn handle(&self, operation: &str) -> MetricsHandle {
        if !self.enabled {
            return MetricsHandle::Disabled;
        }
        let metrics = self
            .operations
            .entry(operation.to_string())
            .or_insert_with(|| {
                debug!(operation, "materializing metrics");
                Arc::new(OperationMetrics::default())
            })
            .clone();
        MetricsHandle::Enabled(metrics)
    }

    /// Snapshot one operation's metrics.
    ///
    /// `None` means absent: metrics are disabled, or the operation was never
    /// registered. A registered operation with no traffic yields a snapshot
    /// of zeros instead.
    pub fn snapshot(&self, operation: &str) -> Option<MetricsSnapshot> {
        if !self.enabled {
            return None;
        }
        self.operations
            .get(operation)
            .map(|metrics| metrics.snapshot())
    }
}
