//! Prometheus metrics backend for the kcc scheduler.
//!
//! [`PrometheusMetrics`] implements [`kcc_core::metrics::MetricsBackend`] on a private
//! [`Registry`]. Serving the text exposition is left to the embedding HTTP server:
//!
//! ```rust
//! use std::sync::Arc;
//! use kcc_core::metrics::MetricsHandle;
//! use kcc_prometheus::PrometheusMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::new()?;
//! let handle: MetricsHandle = Arc::new(metrics.clone());
//! // Broker::builder(..).with_metrics(handle)
//! # let _ = handle;
//!
//! let body = metrics.encode_text()?;
//! assert!(body.is_empty() || body.contains("kcc_"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `kcc_requests_total{toolchain_kind}` - Counter
//! - `kcc_responses_total{outcome}` - Counter
//! - `kcc_routing_errors_total{kind}` - Counter
//! - `kcc_cache_lookups_total{outcome}` - Counter
//! - `kcc_anomalies_total{kind}` - Counter
//! - `kcc_connected_parties{role}` - Gauge

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
