use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tokio::sync::watch;

/// Histogram buckets for timing metrics, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to install metrics recorder: {0}")]
    Install(String),

    #[error("metrics server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the Prometheus recorder behind the `metrics` facade.
pub fn install_recorder() -> Result<PrometheusHandle, StatsError> {
    PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .map_err(|e| StatsError::Install(e.to_string()))?
        .install_recorder()
        .map_err(|e| StatsError::Install(e.to_string()))
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Serve `/metrics` and `/health` until the shutdown flag flips to true.
pub async fn run_server(
    listen: String,
    handle: PrometheusHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), StatsError> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .route("/health", get(health_check))
        .with_state(handle);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!("Metrics server listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Metrics server shutting down gracefully");
        })
        .await?;

    Ok(())
}
