use async_trait::async_trait;

/// Key/value emission to the external message bus. One message per
/// successful poll tick: `key` is the session id's bytes, `value` is the
/// JSON-encoded snapshot with the id attached.
///
/// Delivery is best-effort at-least-once; a send failure is logged by the
/// poller and does not fail the tick (§6.3).
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()>;

    /// Flushes and releases any underlying transport resources. Called once
    /// during process shutdown.
    async fn close(&self);
}
