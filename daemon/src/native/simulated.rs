use async_trait::async_trait;
use cnc_broker_core::{ConnectParams, MachineState, NativeClient, NativeHandle, Snapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-process stand-in for the vendor controller library, used when the
/// `focas` feature isn't enabled. Every connect succeeds immediately and
/// every call returns a small synthetic payload; this is what lets the
/// daemon (and its integration tests) run end to end without the real
/// shared library or physical controllers.
#[derive(Default)]
pub struct SimulatedClient {
    started: Mutex<bool>,
}

impl SimulatedClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NativeClient for SimulatedClient {
    async fn startup(&self, log_mode: &str, log_path: &str) -> anyhow::Result<()> {
        let mut started = self.started.lock().await;
        if *started {
            return Ok(());
        }
        debug!(log_mode, log_path, "simulated native library startup");
        *started = true;
        Ok(())
    }

    async fn connect(&self, params: ConnectParams<'_>) -> anyhow::Result<Box<dyn NativeHandle>> {
        debug!(host = params.host, port = params.port, "simulated connect");
        Ok(Box::new(SimulatedHandle {
            host: params.host.to_string(),
            port: params.port,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        debug!("simulated native library shutdown");
        Ok(())
    }
}

#[derive(Debug)]
struct SimulatedHandle {
    host: String,
    port: u16,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl NativeHandle for SimulatedHandle {
    async fn get_machine_state(&self) -> anyhow::Result<MachineState> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("handle closed");
        }
        Ok(MachineState(serde_json::json!({"run_status": "AUTOMATIC"})))
    }

    async fn get_current_data(&self) -> anyhow::Result<Snapshot> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("handle closed");
        }
        Ok(Snapshot(serde_json::json!({
            "endpoint": format!("{}:{}", self.host, self.port),
            "spindle_speed": 0,
            "feed_rate": 0,
        })))
    }

    async fn get_control_program(&self) -> anyhow::Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("handle closed");
        }
        Ok("O0001\nG00 X0 Y0 Z0\nM30\n".to_string())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
