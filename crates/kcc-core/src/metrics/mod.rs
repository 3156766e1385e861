//! Metrics collection abstraction for the broker.
//!
//! Backends (prometheus, statsd, etc) implement [`MetricsBackend`] and are injected through
//! [`crate::BrokerBuilder::with_metrics`].
mod backend;
pub use backend::{Anomaly, CacheOutcome, MetricsBackend, MetricsHandle, PartyRole};

mod noop;
pub use noop::NoOpMetrics;

use std::sync::Arc;

/// Create a no-op metrics handle.
#[inline]
pub fn noop_metrics() -> MetricsHandle {
    Arc::new(NoOpMetrics)
}
