//! Signal handling for graceful shutdown.
//!
//! The orchestrator never installs handlers itself; it only observes a
//! cancellation token. This layer turns SIGINT/SIGTERM into a cancel.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for a shutdown signal (SIGINT or SIGTERM on Unix).
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to set up SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to set up SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received.", signal = "SIGINT");
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received.", signal = "SIGTERM");
        }
    }
}

/// Wait for Ctrl+C on non-Unix platforms.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!(message = "Signal received.", signal = "Ctrl+C");
}

/// Spawn a watcher that cancels the returned token on the first shutdown
/// signal. In-flight work is allowed to finish; the orchestrator checks the
/// token between files and directories.
pub fn spawn_shutdown_watcher() -> CancellationToken {
    let token = CancellationToken::new();
    let watcher = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Saving progress and stopping after the current file");
        watcher.cancel();
    });
    token
}
