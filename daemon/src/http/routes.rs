use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use axum::{http::StatusCode, Json};
use cnc_broker_core::{CoreError, RegisterRequest, SessionManager};
use serde::Deserialize;
use uuid::Uuid;

use super::response::{error_response, error_response_with_data, success, success_message};

pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/api/v1/connect", post(connect).get(list_or_get).delete(disconnect))
        .route("/api/v1/polling/start", post(start_polling))
        .route("/api/v1/polling/stop", post(stop_polling))
        .route("/api/v1/program", get(get_program))
        .with_state(manager)
}

#[derive(Deserialize)]
pub struct ConnectBody {
    pub endpoint: String,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
}

async fn connect(State(manager): State<Arc<SessionManager>>, Json(body): Json<ConnectBody>) -> Response {
    let req = RegisterRequest {
        endpoint: body.endpoint,
        timeout_ms: body.timeout.unwrap_or(0),
        series: body.series,
        model: body.model,
    };
    match manager.register(req).await {
        Ok(record) => success(record),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize)]
pub struct IdQuery {
    pub id: Option<Uuid>,
}

async fn list_or_get(State(manager): State<Arc<SessionManager>>, Query(q): Query<IdQuery>) -> Response {
    match q.id {
        None => match manager.list().await {
            Ok(records) => success(records),
            Err(err) => error_response(&err),
        },
        Some(id) => match manager.check(id).await {
            Ok(record) => success(record),
            Err(err) => match manager.get_record(id).await {
                Ok(stored) => error_response_with_data(&err, stored),
                Err(_) => error_response(&err),
            },
        },
    }
}

async fn disconnect(State(manager): State<Arc<SessionManager>>, Query(q): Query<IdQuery>) -> Response {
    let Some(id) = q.id else {
        return error_response(&CoreError::BadRequest("missing id".to_string()));
    };
    match manager.delete(id).await {
        Ok(()) => success_message("deleted"),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize)]
pub struct StartPollingBody {
    pub id: Uuid,
    #[serde(default)]
    pub interval: Option<i64>,
}

async fn start_polling(
    State(manager): State<Arc<SessionManager>>,
    Json(body): Json<StartPollingBody>,
) -> Response {
    match manager.start_polling(body.id, body.interval.unwrap_or(0)).await {
        Ok(record) => success(record),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize)]
pub struct StopPollingBody {
    pub id: Uuid,
}

async fn stop_polling(State(manager): State<Arc<SessionManager>>, Json(body): Json<StopPollingBody>) -> Response {
    match manager.stop_polling(body.id).await {
        Ok(record) => success(record),
        Err(err) => error_response(&err),
    }
}

async fn get_program(State(manager): State<Arc<SessionManager>>, Query(q): Query<IdQuery>) -> Response {
    let Some(id) = q.id else {
        return error_response(&CoreError::BadRequest("missing id".to_string()));
    };
    match manager.get_control_program(id).await {
        Ok(program) => (StatusCode::OK, program).into_response(),
        Err(err) => error_response(&err),
    }
}
