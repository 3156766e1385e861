use async_trait::async_trait;

use kcc_core::{AgentStats, CacheStats, ConsumerdStats, RouteInfo, TaskStats};

use crate::error::ApiError;

/// Statistics source behind [`crate::HttpApi`].
///
/// [`crate::BrokerStatsAdapter`] reads a live broker; wrappers can add auth or caching on top.
#[async_trait]
pub trait StatsHandler: Send + Sync + 'static {
    async fn task_stats(&self) -> Result<TaskStats, ApiError>;

    async fn agent_stats(&self) -> Result<Vec<AgentStats>, ApiError>;

    async fn consumerd_stats(&self) -> Result<Vec<ConsumerdStats>, ApiError>;

    async fn cache_stats(&self) -> Result<CacheStats, ApiError>;

    async fn routes(&self) -> Result<Vec<RouteInfo>, ApiError>;
}
