use async_trait::async_trait;
use std::fmt;

/// Opaque snapshot returned by [`NativeClient::get_current_data`]. The core
/// never interprets its contents; it is forwarded to the publisher verbatim
/// alongside the session id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snapshot(pub serde_json::Value);

/// Opaque machine-state payload returned by the health probe. Only its
/// success/failure is meaningful to the core.
#[derive(Debug, Clone)]
pub struct MachineState(pub serde_json::Value);

/// A single connected controller handle. Implementations own whatever
/// native resource backs the connection; [`NativeClient::close`] must be
/// idempotent because the pool may close a handle the connector is still
/// racing against a timeout.
#[async_trait]
pub trait NativeHandle: Send + Sync + fmt::Debug {
    async fn get_machine_state(&self) -> anyhow::Result<MachineState>;
    async fn get_current_data(&self) -> anyhow::Result<Snapshot>;
    async fn get_control_program(&self) -> anyhow::Result<String>;
    async fn close(&self);
}

/// Parameters handed to [`NativeClient::connect`], mirroring the vendor
/// library's `New(ip, port, timeout_ms, series, log_level)` signature.
pub struct ConnectParams<'a> {
    pub host: &'a str,
    pub port: u16,
    pub timeout_ms: u64,
    pub series: &'a str,
    pub log_level: Option<&'a str>,
}

/// Abstraction over the opaque, blocking controller-protocol client
/// library (the "FOCAS-like" native layer in §6.4). Every method here may
/// block far longer than `timeout_ms` suggests; callers are responsible
/// for racing it against a hard wall-clock deadline (see
/// [`crate::connector::Connector`]).
///
/// `connect` must be safe to call from a dedicated worker: the connector
/// races it against [`crate::record::HARD_TIMEOUT_MS`] and, if the deadline
/// wins, disposes of a late-arriving handle itself.
#[async_trait]
pub trait NativeClient: Send + Sync {
    /// One-time process-wide startup, invoked at most once. Implementations
    /// must treat a prior failure as sticky and never re-attempt it.
    async fn startup(&self, log_mode: &str, log_path: &str) -> anyhow::Result<()>;

    /// Establishes a new handle. May block indefinitely; the caller is
    /// expected to impose the hard timeout.
    async fn connect(&self, params: ConnectParams<'_>) -> anyhow::Result<Box<dyn NativeHandle>>;

    /// One-time process-wide teardown, the counterpart to `startup`. Called
    /// at most once, at process shutdown, after every poll task has been
    /// cancelled. Implementations must make it safe to call even if
    /// `startup` was never called or failed.
    async fn shutdown(&self) -> anyhow::Result<()>;
}
