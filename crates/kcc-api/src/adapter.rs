use async_trait::async_trait;

use kcc_core::{AgentStats, Broker, CacheStats, ConsumerdStats, RouteInfo, TaskStats};

use crate::{error::ApiError, handler::StatsHandler};

/// [`StatsHandler`] reading straight from a [`Broker`].
pub struct BrokerStatsAdapter {
    broker: Broker,
}

impl BrokerStatsAdapter {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    fn live(&self) -> Result<&Broker, ApiError> {
        if self.broker.is_closed() {
            return Err(ApiError::Unavailable("broker is shutting down".into()));
        }
        Ok(&self.broker)
    }
}

#[async_trait]
impl StatsHandler for BrokerStatsAdapter {
    async fn task_stats(&self) -> Result<TaskStats, ApiError> {
        Ok(self.live()?.task_stats())
    }

    async fn agent_stats(&self) -> Result<Vec<AgentStats>, ApiError> {
        Ok(self.live()?.agent_stats())
    }

    async fn consumerd_stats(&self) -> Result<Vec<ConsumerdStats>, ApiError> {
        Ok(self.live()?.consumerd_stats())
    }

    async fn cache_stats(&self) -> Result<CacheStats, ApiError> {
        Ok(self.live()?.cache_stats())
    }

    async fn routes(&self) -> Result<Vec<RouteInfo>, ApiError> {
        Ok(self.live()?.routes())
    }
}
