use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard wall-clock budget enforced on every connect and health probe,
/// independent of whatever timeout the native library was told about.
pub const HARD_TIMEOUT_MS: u64 = 5_000;

/// Default per-call timeout applied when a caller omits or supplies a
/// non-positive `timeout_ms`.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default polling period applied when `Start` is called without an
/// explicit (or with a non-positive) interval.
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

/// Backoff applied to the poll loop after a failed reconnect attempt.
pub const POLL_BACKOFF_MS: u64 = 5_000;

/// Observed reachability of a session's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Connected,
    Reconnecting,
}

/// Operator-declared intent for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Static,
    Polling,
}

/// Durable, per-controller configuration and observed state.
///
/// This is the unit of truth persisted by the [`Repository`](crate::persistence::Repository)
/// port; it is deliberately free of anything that can't survive a restart
/// (the live client handle and cancel token live only in the
/// [`SessionPool`](crate::pool::SessionPool)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub series: String,
    pub model: String,
    pub interval_ms: u64,
    pub status: Status,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Builds a brand-new record with normalized defaults, ready for
    /// insertion. Timestamps are supplied by the caller so the core stays
    /// free of wall-clock reads outside of timing budgets.
    /// `timeout_ms` is taken as-is; callers normalize (see
    /// [`normalize_timeout`]) before constructing a record, since the raw
    /// caller-supplied value may be a signed type with a different
    /// default-substitution rule than the persisted field's.
    pub fn new(
        endpoint: String,
        timeout_ms: u64,
        series: Option<String>,
        model: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            timeout_ms,
            series: non_empty_or_unknown(series),
            model: non_empty_or_unknown(model),
            interval_ms: DEFAULT_INTERVAL_MS,
            status: Status::Reconnecting,
            mode: Mode::Static,
            created_at: now,
            updated_at: now,
        }
    }

    /// Host/port pair parsed out of `endpoint`. Returns `None` on malformed
    /// input so callers can map it to `BadRequest`.
    pub fn parse_endpoint(endpoint: &str) -> Option<(String, u16)> {
        parse_endpoint(endpoint)
    }
}

/// Clamps a caller-declared timeout into `[1, HARD_TIMEOUT_MS]`, applying
/// the default when the caller passed a non-positive value (zero, not set,
/// or negative — the original's signed `int` field lets a client send a
/// negative timeout, and that must hit the same default as zero rather than
/// be rejected at the wire boundary).
pub fn normalize_timeout(timeout_ms: i64) -> u64 {
    if timeout_ms <= 0 {
        DEFAULT_TIMEOUT_MS
    } else {
        (timeout_ms as u64).min(HARD_TIMEOUT_MS)
    }
}

/// Applies the `interval ≤ 0 → default` rule used both by `Start` and by
/// the restore coordinator's internal start path.
pub fn normalize_interval(interval_ms: i64) -> u64 {
    if interval_ms <= 0 {
        DEFAULT_INTERVAL_MS
    } else {
        interval_ms as u64
    }
}

fn non_empty_or_unknown(value: Option<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => "Unknown".to_string(),
    }
}

/// Splits `host:port`, validating the port as a 16-bit unsigned integer.
/// IPv6 literals in bracket notation (`[::1]:8193`) are accepted.
pub fn parse_endpoint(endpoint: &str) -> Option<(String, u16)> {
    let (host, port) = endpoint.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let port: u16 = port.parse().ok()?;
    Some((host, port))
}
