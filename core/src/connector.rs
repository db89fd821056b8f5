use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::native::{ConnectParams, NativeClient, NativeHandle};
use crate::record::HARD_TIMEOUT_MS;

/// Establishes live sessions through the blocking native client library
/// within a hard wall-clock budget, regardless of what the library's own
/// `timeout_ms` parameter does internally.
///
/// The native `connect` call is launched on its own task and raced against
/// [`HARD_TIMEOUT_MS`] via [`tokio::time::timeout`]. If the deadline wins,
/// the worker keeps running in the background; whichever handle it
/// eventually produces is closed immediately rather than handed back, so no
/// native resource is leaked even though the caller already observed a
/// `Timeout`.
pub struct Connector {
    native: Arc<dyn NativeClient>,
}

impl Connector {
    pub fn new(native: Arc<dyn NativeClient>) -> Self {
        Self { native }
    }

    /// Connects to `host:port` with the given `timeout_ms`/`series`,
    /// bounded by the hard deadline.
    pub async fn connect(
        &self,
        endpoint: &str,
        host: &str,
        port: u16,
        timeout_ms: u64,
        series: &str,
    ) -> CoreResult<Arc<dyn NativeHandle>> {
        let native = self.native.clone();
        let host = host.to_string();
        let series = series.to_string();

        let worker = tokio::spawn(async move {
            native
                .connect(ConnectParams {
                    host: &host,
                    port,
                    timeout_ms,
                    series: &series,
                    log_level: None,
                })
                .await
        });

        match tokio::time::timeout(Duration::from_millis(HARD_TIMEOUT_MS), worker).await {
            Ok(Ok(Ok(handle))) => Ok(Arc::from(handle)),
            Ok(Ok(Err(source))) => Err(CoreError::Unreachable {
                endpoint: endpoint.to_string(),
                source,
            }),
            Ok(Err(join_err)) => Err(CoreError::Internal(join_err.into())),
            Err(_elapsed) => {
                let endpoint = endpoint.to_string();
                tokio::spawn(async move {
                    // The worker is still racing; whatever it eventually
                    // produces is stale from the caller's point of view, so
                    // close it as soon as it lands.
                    match worker.await {
                        Ok(Ok(handle)) => handle.close().await,
                        Ok(Err(err)) => {
                            warn!(%endpoint, error = %err, "late connect failed after hard timeout");
                        }
                        Err(join_err) => {
                            warn!(%endpoint, error = %join_err, "late connect task panicked");
                        }
                    }
                });
                Err(CoreError::Timeout {
                    endpoint,
                    timeout_ms: HARD_TIMEOUT_MS,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::MachineState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct StubHandle {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl NativeHandle for StubHandle {
        async fn get_machine_state(&self) -> anyhow::Result<MachineState> {
            Ok(MachineState(serde_json::json!({})))
        }
        async fn get_current_data(&self) -> anyhow::Result<crate::native::Snapshot> {
            Ok(crate::native::Snapshot(serde_json::json!({})))
        }
        async fn get_control_program(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FastClient;

    #[async_trait]
    impl NativeClient for FastClient {
        async fn startup(&self, _log_mode: &str, _log_path: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn connect(
            &self,
            _params: ConnectParams<'_>,
        ) -> anyhow::Result<Box<dyn NativeHandle>> {
            Ok(Box::new(StubHandle {
                closed: Arc::new(AtomicBool::new(false)),
            }))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct HangingClient;

    #[async_trait]
    impl NativeClient for HangingClient {
        async fn startup(&self, _log_mode: &str, _log_path: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn connect(
            &self,
            _params: ConnectParams<'_>,
        ) -> anyhow::Result<Box<dyn NativeHandle>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Box::new(StubHandle {
                closed: Arc::new(AtomicBool::new(false)),
            }))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl NativeClient for FailingClient {
        async fn startup(&self, _log_mode: &str, _log_path: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn connect(
            &self,
            _params: ConnectParams<'_>,
        ) -> anyhow::Result<Box<dyn NativeHandle>> {
            anyhow::bail!("connection refused")
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn connect_succeeds_promptly() {
        let connector = Connector::new(Arc::new(FastClient));
        let result = connector
            .connect("10.0.0.1:8193", "10.0.0.1", 8193, 2000, "0i")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn connect_surfaces_native_failure() {
        let connector = Connector::new(Arc::new(FailingClient));
        let result = connector
            .connect("10.0.0.1:8193", "10.0.0.1", 8193, 2000, "0i")
            .await;
        assert!(matches!(result, Err(CoreError::Unreachable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_at_hard_deadline() {
        let connector = Connector::new(Arc::new(HangingClient));
        let call = connector.connect("10.0.0.1:8193", "10.0.0.1", 8193, 2000, "0i");
        tokio::time::pause();
        let result = tokio::time::timeout(Duration::from_secs(6), async {
            tokio::time::advance(Duration::from_millis(HARD_TIMEOUT_MS + 10)).await;
            call.await
        })
        .await
        .expect("test itself should not time out");
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }
}
