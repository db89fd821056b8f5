//! The thin HTTP translation layer (§6.1): request validation + axum
//! routing onto [`cnc_broker_core::SessionManager`] operations. No business
//! logic lives here.

mod auth;
mod logging;
mod response;
mod routes;

use std::sync::Arc;

use axum::middleware;
use axum::Router;
use cnc_broker_core::SessionManager;
use tower_http::trace::TraceLayer;

/// Builds the full application router: request logging, then API-key
/// enforcement, then the versioned routes.
pub fn app(manager: Arc<SessionManager>, api_key: String) -> Router {
    routes::router(manager)
        .layer(middleware::from_fn_with_state(Arc::new(api_key), auth::require_api_key))
        .layer(middleware::from_fn(logging::log_requests))
        .layer(TraceLayer::new_for_http())
}
