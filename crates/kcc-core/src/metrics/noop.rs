use kcc_model::CompileResult;

use crate::metrics::backend::{Anomaly, CacheOutcome, MetricsBackend, PartyRole};

/// No-op metrics backend that compiles to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsBackend for NoOpMetrics {
    #[inline(always)]
    fn record_request(&self, _: &str) {}

    #[inline(always)]
    fn record_response(&self, _: CompileResult) {}

    #[inline(always)]
    fn record_routing_error(&self, _: &str) {}

    #[inline(always)]
    fn record_cache(&self, _: CacheOutcome) {}

    #[inline(always)]
    fn record_anomaly(&self, _: Anomaly) {}

    #[inline(always)]
    fn set_connected(&self, _: PartyRole, _: usize) {}
}
