use tokio::signal as os_signal;

/// Resolves once `SIGINT` (or `SIGTERM` on Unix) is received, for use as
/// axum's `with_graceful_shutdown` future. Mirrors the daemon binary's
/// original ctrl-c/SIGTERM race.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        os_signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        os_signal::unix::signal(os_signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
