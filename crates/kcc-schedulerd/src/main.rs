use std::{path::Path, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kcc_api::{BrokerStatsAdapter, HttpApi, TcpFrontend};
use kcc_core::{Broker, ToolchainRegistry};
use kcc_observe::{OFFSET_REFRESH_PERIOD, init_local_offset, init_logging, spawn_offset_refresh};
use kcc_prometheus::PrometheusMetrics;

mod config;
use config::DaemonConfig;

fn main() -> anyhow::Result<()> {
    // 1) config
    let cfg = match std::env::args_os().nth(1) {
        Some(path) => DaemonConfig::load(Path::new(&path))?,
        None => DaemonConfig::default(),
    };

    // 2) logger; the local offset is only readable while the process is single-threaded
    init_local_offset();
    init_logging(&cfg.log)?;
    info!(listen = %cfg.listen, http = %cfg.http, "logger initialized");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(run(cfg))
}

async fn run(cfg: DaemonConfig) -> anyhow::Result<()> {
    let lifetime = CancellationToken::new();

    // 3) metrics
    let metrics = Arc::new(PrometheusMetrics::new()?);

    // 4) broker
    let registry = Arc::new(ToolchainRegistry::new());
    let broker = Broker::builder(lifetime.clone(), registry.clone())
        .with_config(cfg.broker)
        .with_metrics(metrics.clone())
        .build();

    // 5) party listener
    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    let frontend = tokio::spawn(TcpFrontend::new(broker.clone(), registry).serve(listener, lifetime.clone()));

    // 6) statistics + /metrics
    let app = HttpApi::new(Arc::new(BrokerStatsAdapter::new(broker.clone())))
        .router()
        .merge(metrics_router(metrics));
    let http_listener = TcpListener::bind(cfg.http)
        .await
        .with_context(|| format!("binding {}", cfg.http))?;
    info!(addr = %cfg.http, "serving statistics");
    let shutdown = lifetime.clone();
    let http = tokio::spawn(async move {
        axum::serve(http_listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
    });

    // 7) local offset refresh
    let refresh = spawn_offset_refresh(lifetime.clone(), OFFSET_REFRESH_PERIOD);

    // 8) run until signalled
    shutdown_signal().await;
    info!(
        agents = broker.agent_count(),
        consumerds = broker.consumerd_count(),
        "shutting down"
    );
    lifetime.cancel();

    frontend.await?;
    refresh.await?;
    if let Err(e) = http.await? {
        error!(error = %e, "statistics server failed");
    }
    Ok(())
}

fn metrics_router(metrics: Arc<PrometheusMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<PrometheusMetrics>>) -> Response {
    match metrics.encode_text() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
