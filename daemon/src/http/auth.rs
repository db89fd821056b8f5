use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::sync::Arc;

/// Rejects any request whose `X-API-Key` header (or `api_key` query
/// parameter, as a fallback) doesn't match the configured key.
pub async fn require_api_key(
    State(expected): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let header_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let query_key = request.uri().query().and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "api_key")
            .map(|(_, v)| v.to_string())
    });

    let provided = header_key.or(query_key);

    if provided.as_deref() == Some(expected.as_str()) && !expected.is_empty() {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"status": "error", "message": "unauthorized"})),
    )
        .into_response()
}
