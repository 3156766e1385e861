use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;

use kcc_core::{AgentStats, ConsumerdStats, RouteInfo};

use crate::{error::ApiError, handler::StatsHandler};

/// HTTP statistics service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
}

impl<H> HttpApi<H>
where
    H: StatsHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Build axum router with mounted endpoints.
    ///
    /// Routes:
    /// - GET /api/v1/stats/tasks - Request counters and party totals
    /// - GET /api/v1/stats/agents - Per-agent state and token usage
    /// - GET /api/v1/stats/consumerds - Per-consumerd state
    /// - GET /api/v1/stats/cache - Cache lookup counters
    /// - GET /api/v1/routes - Live routes with their producers and consumers
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/stats/tasks", get(task_stats::<H>))
            .route("/api/v1/stats/agents", get(agent_stats::<H>))
            .route("/api/v1/stats/consumerds", get(consumerd_stats::<H>))
            .route("/api/v1/stats/cache", get(cache_stats::<H>))
            .route("/api/v1/routes", get(list_routes::<H>))
            .with_state(self.handler)
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct AgentStatsResponse {
    agents: Vec<AgentStats>,
}

#[derive(Debug, Serialize)]
struct ConsumerdStatsResponse {
    consumerds: Vec<ConsumerdStats>,
}

#[derive(Debug, Serialize)]
struct RoutesResponse {
    routes: Vec<RouteInfo>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn task_stats<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: StatsHandler,
{
    Ok(Json(handler.task_stats().await?))
}

async fn agent_stats<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: StatsHandler,
{
    let agents = handler.agent_stats().await?;
    Ok(Json(AgentStatsResponse { agents }))
}

async fn consumerd_stats<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: StatsHandler,
{
    let consumerds = handler.consumerd_stats().await?;
    Ok(Json(ConsumerdStatsResponse { consumerds }))
}

async fn cache_stats<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: StatsHandler,
{
    Ok(Json(handler.cache_stats().await?))
}

async fn list_routes<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: StatsHandler,
{
    let routes = handler.routes().await?;
    Ok(Json(RoutesResponse { routes }))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use kcc_core::{CacheStats, ConnectionState, TaskStats};
    use kcc_model::PartyId;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    struct FixedStats {
        agent: PartyId,
        down: bool,
    }

    impl FixedStats {
        fn check(&self) -> Result<(), ApiError> {
            if self.down {
                return Err(ApiError::Unavailable("broker is shutting down".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StatsHandler for FixedStats {
        async fn task_stats(&self) -> Result<TaskStats, ApiError> {
            self.check()?;
            Ok(TaskStats {
                requests_total: 12,
                completed_total: 10,
                failed_total: 1,
                pending: 1,
                agents: 1,
                consumerds: 2,
                usage_limit_total: 8,
            })
        }

        async fn agent_stats(&self) -> Result<Vec<AgentStats>, ApiError> {
            self.check()?;
            Ok(vec![AgentStats {
                id: self.agent,
                state: ConnectionState::Streaming,
                completed_total: 10,
                usage_limit: 8,
                tokens: 8,
                tokens_in_use: 1,
                in_flight: 1,
                toolchains: 2,
            }])
        }

        async fn consumerd_stats(&self) -> Result<Vec<ConsumerdStats>, ApiError> {
            self.check()?;
            Ok(Vec::new())
        }

        async fn cache_stats(&self) -> Result<CacheStats, ApiError> {
            Err(ApiError::Internal("cache stats exploded".into()))
        }

        async fn routes(&self) -> Result<Vec<RouteInfo>, ApiError> {
            self.check()?;
            Ok(Vec::new())
        }
    }

    async fn serve(handler: FixedStats) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = HttpApi::new(Arc::new(handler)).router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Minimal HTTP/1.1 GET; returns the status code and body.
    async fn get(addr: std::net::SocketAddr, path: &str) -> (u16, serde_json::Value) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8(raw).unwrap();

        let status = text
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap();
        let (_, body) = text.split_once("\r\n\r\n").unwrap();
        (status, serde_json::from_str(body).unwrap())
    }

    #[tokio::test]
    async fn task_stats_are_served_as_camel_case_json() {
        let addr = serve(FixedStats {
            agent: PartyId::new(),
            down: false,
        })
        .await;

        let (status, body) = get(addr, "/api/v1/stats/tasks").await;
        assert_eq!(status, 200);
        assert_eq!(body["requestsTotal"], 12);
        assert_eq!(body["usageLimitTotal"], 8);
    }

    #[tokio::test]
    async fn agent_stats_are_wrapped() {
        let agent = PartyId::new();
        let addr = serve(FixedStats { agent, down: false }).await;

        let (status, body) = get(addr, "/api/v1/stats/agents").await;
        assert_eq!(status, 200);
        assert_eq!(body["agents"][0]["id"], agent.to_string());
        assert_eq!(body["agents"][0]["state"], "streaming");
        assert_eq!(body["agents"][0]["tokensInUse"], 1);

        let (status, body) = get(addr, "/api/v1/routes").await;
        assert_eq!(status, 200);
        assert_eq!(body["routes"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let addr = serve(FixedStats {
            agent: PartyId::new(),
            down: true,
        })
        .await;

        let (status, body) = get(addr, "/api/v1/stats/consumerds").await;
        assert_eq!(status, 503);
        assert_eq!(body["error"], "service unavailable: broker is shutting down");

        let (status, body) = get(addr, "/api/v1/stats/cache").await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "internal error: cache stats exploded");
    }
}
