mod config;
mod http;
mod native;
mod publish;
mod repository;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use cnc_broker_core::SessionManager;
use tracing_subscriber::EnvFilter;

use config::Config;
use publish::KafkaPublisher;
use repository::PostgresRepository;

#[derive(Parser, Debug)]
#[command(name = "cnc-broker", about = "Session broker for a fleet of CNC controllers")]
struct Cli {
    /// Overrides LOG_LEVEL for this run without touching the environment.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let log_level = cli.log_level.unwrap_or_else(|| config.app.log_level.clone());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::from_default_env()))
        .init();

    tracing::info!(port = config.app.port, "starting cnc-broker");

    let repo: Arc<dyn cnc_broker_core::Repository> = Arc::new(
        PostgresRepository::connect(
            &config.database_admin_url(),
            &config.database_url(),
            &config.database.name,
        )
        .await?,
    );

    let native = build_native_client();
    native
        .startup(&config.app.native_log_level, "")
        .await
        .map_err(|e| anyhow::anyhow!("native library startup failed: {e}"))?;

    let publisher: Arc<dyn cnc_broker_core::Publisher> =
        Arc::new(KafkaPublisher::new(&config.kafka.broker, &config.kafka.topic)?);

    let manager = Arc::new(SessionManager::new(repo, native, publisher.clone()));
    manager.spawn_restore();

    let app = http::app(manager, config.app.api_key.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.app.port)).await?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_shutdown_signal())
        .await?;

    tracing::info!("shutting down, cancelling poll tasks and closing native client");
    manager
        .shutdown(std::time::Duration::from_secs(SHUTDOWN_BUDGET_SECS))
        .await;

    tracing::info!("closing publisher");
    publisher.close().await;

    Ok(())
}

/// Wall-clock budget for the native client teardown step (§5).
const SHUTDOWN_BUDGET_SECS: u64 = 5;

#[cfg(feature = "focas")]
fn build_native_client() -> Arc<dyn cnc_broker_core::NativeClient> {
    let lib_path = std::env::var("FOCAS_LIB_PATH").unwrap_or_else(|_| "libfwlib32.so".to_string());
    match native::FocasClient::load(&lib_path) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::error!(error = %err, lib_path, "failed to load FOCAS library, falling back to simulated client");
            Arc::new(native::SimulatedClient::new())
        }
    }
}

#[cfg(not(feature = "focas"))]
fn build_native_client() -> Arc<dyn cnc_broker_core::NativeClient> {
    Arc::new(native::SimulatedClient::new())
}
