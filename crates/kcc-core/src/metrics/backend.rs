use std::sync::Arc;

use kcc_model::CompileResult;

/// Cache lookup outcome for metrics classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Object found; the request never reached an agent.
    Hit,
    /// Object not found; the request was routed normally.
    Miss,
    /// Cache unreachable or timed out; the request was routed normally.
    Error,
}

impl CacheOutcome {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Error => "error",
        }
    }
}

/// Protocol invariant violations. Each one is logged and the offending message dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// An agent answered while holding no locked token.
    TokenImbalance,
    /// A response arrived for a request id with no pending correlation.
    UnmatchedResponse,
    /// A consumerd reused the id of a request that is still in flight.
    DuplicateRequest,
}

impl Anomaly {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            Anomaly::TokenImbalance => "token_imbalance",
            Anomaly::UnmatchedResponse => "unmatched_response",
            Anomaly::DuplicateRequest => "duplicate_request",
        }
    }
}

/// Which side of the broker a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartyRole {
    Agent,
    Consumerd,
}

impl PartyRole {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            PartyRole::Agent => "agent",
            PartyRole::Consumerd => "consumerd",
        }
    }
}

/// Backend metrics collection interface.
///
/// Implementations are handed to the broker builder and shared by every connection task.
pub trait MetricsBackend: Send + Sync + 'static {
    /// Record a request accepted from a consumerd stream.
    ///
    /// # Arguments
    /// - `toolchain_kind`: compiler family of the request, `"none"` when absent
    fn record_request(&self, toolchain_kind: &str);
    /// Record a response handed to its requester.
    fn record_response(&self, result: CompileResult);
    /// Record a request the router refused to place.
    ///
    /// # Arguments
    /// - `error_kind`: see [`crate::RouteError::as_label`]
    fn record_routing_error(&self, error_kind: &str);
    /// Record the outcome of a cache lookup.
    fn record_cache(&self, outcome: CacheOutcome);
    /// Record a protocol invariant violation.
    fn record_anomaly(&self, anomaly: Anomaly);
    /// Publish the number of connected parties of one role.
    fn set_connected(&self, role: PartyRole, count: usize);
}

/// Shared handle to metrics backend.
pub type MetricsHandle = Arc<dyn MetricsBackend>;
