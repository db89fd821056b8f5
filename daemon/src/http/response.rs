use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use cnc_broker_core::CoreError;
use serde::Serialize;

/// JSON envelope every route responds with: `{status, message?, data?}`
/// (§6.1). Mirrors the original service's `models.APIResponse`.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: "ok",
            message: None,
            data: Some(data),
        }
    }

    pub fn ok_message(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            status: "ok",
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Wraps `data` as a `200` success envelope.
pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

/// Wraps a bare success message (no payload) as a `200` envelope.
pub fn success_message(message: impl Into<String>) -> Response {
    (StatusCode::OK, Json(ApiResponse::<()>::ok_message(message))).into_response()
}

/// Like [`error_response`] but attaches `data` alongside the error message,
/// for the "still return the stored record" cases in §6.1/§7.
pub fn error_response_with_data<T: Serialize>(err: &CoreError, data: T) -> Response {
    let status = status_for(err);
    let body = ApiResponse {
        status: "error",
        message: Some(err.to_string()),
        data: Some(data),
    };
    (status, Json(body)).into_response()
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
        CoreError::Conflict { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Unreachable { .. } | CoreError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::AlreadyActive(_) | CoreError::NotActive(_) => StatusCode::BAD_REQUEST,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Translates a [`CoreError`] into an HTTP status and error envelope,
/// following the taxonomy in §7. `Check`'s "still return the stored
/// record" behavior is handled by the caller, not here: this function only
/// ever produces an error-shaped body.
pub fn error_response(err: &CoreError) -> Response {
    let status = status_for(err);

    let body = ApiResponse::<()> {
        status: "error",
        message: Some(err.to_string()),
        data: None,
    };
    (status, Json(body)).into_response()
}
