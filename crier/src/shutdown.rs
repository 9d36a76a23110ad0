//! Signal-driven shutdown.
//!
//! SIGTERM/SIGINT clear the running flag and fire the broadcast channel the
//! acceptor loops select on. Session workers do not poll the flag; they exit
//! when their connection closes.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::info;

/// Global running flag, observed by the acceptor and discovery loops.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

#[inline]
pub fn is_running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

#[cfg(unix)]
#[allow(clippy::expect_used)] // Signal handlers are startup-critical; abort is correct on failure
pub fn install_signal_handlers(
    shutdown_tx: broadcast::Sender<()>,
) -> impl std::future::Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

    async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(target: "crier::shutdown", "SIGTERM received, shutting down");
            }
            _ = sigint.recv() => {
                info!(target: "crier::shutdown", "SIGINT received, shutting down");
            }
        }

        RUNNING.store(false, Ordering::SeqCst);
        let _ = shutdown_tx.send(());
    }
}

#[cfg(windows)]
pub async fn install_signal_handlers(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "crier::shutdown", error = %e, "Failed to listen for Ctrl+C");
        return;
    }

    info!(target: "crier::shutdown", "Ctrl+C received, shutting down");
    RUNNING.store(false, Ordering::SeqCst);
    let _ = shutdown_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_flag() {
        RUNNING.store(true, Ordering::SeqCst);
        assert!(is_running());

        RUNNING.store(false, Ordering::SeqCst);
        assert!(!is_running());

        // Reset for other tests
        RUNNING.store(true, Ordering::SeqCst);
    }
}
