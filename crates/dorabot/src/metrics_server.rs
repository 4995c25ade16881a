//! HTTP server exposing Prometheus metrics (§1.1 ambient stack), mirroring
//! the teacher's `core::metrics_server`: one `/metrics` route, one `/health`
//! liveness route, on its own port so it's reachable independently of the
//! bot's long-poll/webhook connection.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

pub async fn spawn(port: u16) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler)).route("/health", get(health_handler));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    let body = doracore::metrics::encode_to_string();
    if body.is_empty() {
        error!("failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body).into_response()
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}
