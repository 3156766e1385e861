use std::sync::Arc;

use prometheus::{
    CounterVec, Encoder, IntGaugeVec, Opts, Registry, TextEncoder, proto::MetricFamily,
};

use kcc_core::metrics::{Anomaly, CacheOutcome, MetricsBackend, PartyRole};
use kcc_model::CompileResult;

const NAMESPACE: &str = "kcc";

/// Prometheus metrics backend for the broker.
///
/// ## Label cardinality
/// All labels are bounded:
/// - `toolchain_kind`: "gnu", "clang", "test", "sleep", "unknown", "none"
/// - `outcome`: "success", "fail", "internal_error" / "hit", "miss", "error"
/// - `kind`: route error and anomaly labels from `kcc-core`
/// - `role`: "agent", "consumerd"
#[derive(Clone)]
pub struct PrometheusMetrics {
    requests: CounterVec,
    responses: CounterVec,
    routing_errors: CounterVec,
    cache_lookups: CounterVec,
    anomalies: CounterVec,
    connected: IntGaugeVec,
    registry: Arc<Registry>,
}

impl PrometheusMetrics {
    /// Create the backend and register its collectors in `registry`.
    pub fn new_with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let requests = counter(
            &registry,
            "requests_total",
            "Compile requests accepted from consumerds",
            &["toolchain_kind"],
        )?;
        let responses = counter(
            &registry,
            "responses_total",
            "Compile responses handed to consumerds",
            &["outcome"],
        )?;
        let routing_errors = counter(
            &registry,
            "routing_errors_total",
            "Requests the router refused to place",
            &["kind"],
        )?;
        let cache_lookups = counter(
            &registry,
            "cache_lookups_total",
            "Object cache lookups",
            &["outcome"],
        )?;
        let anomalies = counter(
            &registry,
            "anomalies_total",
            "Protocol invariant violations",
            &["kind"],
        )?;

        let connected = IntGaugeVec::new(
            Opts::new("connected_parties", "Parties currently connected").namespace(NAMESPACE),
            &["role"],
        )?;
        registry.register(Box::new(connected.clone()))?;

        Ok(Self {
            requests,
            responses,
            routing_errors,
            cache_lookups,
            anomalies,
            connected,
            registry,
        })
    }

    /// Create the backend on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::new_with_registry(Arc::new(Registry::new()))
    }

    /// Gather all metrics for exposition.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, prometheus::Error> {
    let c = CounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl MetricsBackend for PrometheusMetrics {
    fn record_request(&self, toolchain_kind: &str) {
        self.requests.with_label_values(&[toolchain_kind]).inc();
    }

    fn record_response(&self, result: CompileResult) {
        self.responses.with_label_values(&[result.as_label()]).inc();
    }

    fn record_routing_error(&self, error_kind: &str) {
        self.routing_errors.with_label_values(&[error_kind]).inc();
    }

    fn record_cache(&self, outcome: CacheOutcome) {
        self.cache_lookups
            .with_label_values(&[outcome.as_label()])
            .inc();
    }

    fn record_anomaly(&self, anomaly: Anomaly) {
        self.anomalies.with_label_values(&[anomaly.as_label()]).inc();
    }

    fn set_connected(&self, role: PartyRole, count: usize) {
        self.connected
            .with_label_values(&[role.as_label()])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.name() == name)
            .unwrap_or_else(|| panic!("expected metric {name}, got none"))
    }

    #[test]
    fn requests_are_labelled_by_kind() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_request("gnu");
        metrics.record_request("gnu");
        metrics.record_request("clang");

        let families = metrics.gather();
        assert_eq!(family(&families, "kcc_requests_total").get_metric().len(), 2);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("kcc_requests_total{toolchain_kind=\"gnu\"} 2"), "got {text}");
        assert!(text.contains("kcc_requests_total{toolchain_kind=\"clang\"} 1"), "got {text}");
    }

    #[test]
    fn responses_and_cache_outcomes() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_response(CompileResult::Success);
        metrics.record_response(CompileResult::InternalError);
        metrics.record_cache(CacheOutcome::Hit);
        metrics.record_cache(CacheOutcome::Miss);
        metrics.record_cache(CacheOutcome::Miss);

        let families = metrics.gather();
        assert_eq!(family(&families, "kcc_responses_total").get_metric().len(), 2);
        assert_eq!(family(&families, "kcc_cache_lookups_total").get_metric().len(), 2);
    }

    #[test]
    fn errors_and_anomalies() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_routing_error("no_agents");
        metrics.record_anomaly(Anomaly::UnmatchedResponse);
        metrics.record_anomaly(Anomaly::TokenImbalance);

        let families = metrics.gather();
        assert_eq!(family(&families, "kcc_routing_errors_total").get_metric().len(), 1);
        assert_eq!(family(&families, "kcc_anomalies_total").get_metric().len(), 2);
    }

    #[test]
    fn connected_gauge_tracks_latest_value() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.set_connected(PartyRole::Agent, 3);
        metrics.set_connected(PartyRole::Agent, 1);
        metrics.set_connected(PartyRole::Consumerd, 2);

        let families = metrics.gather();
        assert_eq!(family(&families, "kcc_connected_parties").get_metric().len(), 2);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("kcc_connected_parties{role=\"agent\"} 1"), "got {text}");
        assert!(text.contains("kcc_connected_parties{role=\"consumerd\"} 2"), "got {text}");
    }

    #[test]
    fn text_exposition_contains_metric_names() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_request("gnu");

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("kcc_requests_total{toolchain_kind=\"gnu\"} 1"), "got {text}");
    }

    #[test]
    fn can_use_custom_registry() {
        let registry = Arc::new(Registry::new());
        let metrics = PrometheusMetrics::new_with_registry(registry.clone()).unwrap();

        metrics.record_routing_error("canceled");
        assert!(!registry.gather().is_empty());
        assert!(PrometheusMetrics::new_with_registry(registry).is_err());
    }
}
