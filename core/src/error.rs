use uuid::Uuid;

/// Errors surfaced by the session manager core.
///
/// These map fairly directly onto HTTP status codes at the daemon's API
/// boundary: see `daemon::http::response` for that translation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("session for endpoint {endpoint:?} already exists (id {id})")]
    Conflict { endpoint: String, id: Uuid },

    #[error("no session with id {0}")]
    NotFound(Uuid),

    #[error("controller at {endpoint} is unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connection attempt to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("session {0} is already polling")]
    AlreadyActive(Uuid),

    #[error("session {0} is not polling")]
    NotActive(Uuid),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
