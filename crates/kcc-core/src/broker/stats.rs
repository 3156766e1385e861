use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use kcc_model::PartyId;

use crate::broker::party::ConnectionState;

/// Point-in-time view of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub id: PartyId,
    pub state: ConnectionState,
    /// Responses received from this agent.
    pub completed_total: u64,
    /// Concurrent process limit the agent advertised.
    pub usage_limit: u32,
    /// Tokens granted after clamping.
    pub tokens: usize,
    pub tokens_in_use: usize,
    pub in_flight: usize,
    pub toolchains: usize,
}

/// Point-in-time view of one consumerd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerdStats {
    pub id: PartyId,
    pub state: ConnectionState,
    /// Responses delivered to this consumerd.
    pub completed_total: u64,
    /// Requests from this consumerd still waiting for a response.
    pub pending: usize,
    pub toolchains: usize,
}

/// Broker-wide task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    /// Requests accepted and successfully routed or intercepted.
    pub requests_total: u64,
    /// Correlated responses with a `Success` result.
    pub completed_total: u64,
    /// Correlated responses with a `Fail` or `InternalError` result.
    pub failed_total: u64,
    pub pending: usize,
    pub agents: usize,
    pub consumerds: usize,
    /// Sum of every connected agent's concurrent process limit.
    pub usage_limit_total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// A cache client is configured.
    pub enabled: bool,
    /// Lookups are currently performed.
    pub available: bool,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

#[derive(Default)]
pub(crate) struct TaskCounters {
    requests: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl TaskCounters {
    pub(crate) fn request_accepted(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo [`TaskCounters::request_accepted`] for a request the router refused.
    pub(crate) fn request_refused(&self) {
        let _ = self
            .requests
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill(&self, stats: &mut TaskStats) {
        stats.requests_total = self.requests.load(Ordering::Relaxed);
        stats.completed_total = self.completed.load(Ordering::Relaxed);
        stats.failed_total = self.failed.load(Ordering::Relaxed);
    }
}
