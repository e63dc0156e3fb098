// HTTP server for Prometheus metrics endpoint
//
// Listens on /metrics and /health (default: 127.0.0.1:9090)
// Used by Prometheus to scrape metrics

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::metrics;

/// Start the metrics HTTP server on a loopback port
pub async fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(&addr)
        .await
        .context("Failed to bind metrics server")?;
    serve(listener).await
}

/// Serve metrics on an already-bound listener
pub async fn serve(listener: TcpListener) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler));

    info!("Starting metrics server on {:?}", listener.local_addr().ok());

    axum::serve(listener, app)
        .await
        .context("Metrics server error")?;

    Ok(())
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_and_health_endpoints() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener));

        metrics::init().unwrap();
        metrics::record_command(metrics::Target::Local, Some(0), 0.1);

        let health = get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));

        let body = get(addr, "/metrics").await;
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("shellward_commands_total"));

        server.abort();
    }
}
