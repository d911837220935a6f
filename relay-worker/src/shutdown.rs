//! Process-wide shutdown signal.
//!
//! One `CancellationToken` is cancelled on SIGINT/SIGTERM and every consumer,
//! retry loop and the reconnection watch hold a child of it.

use std::future::Future;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Broadcasts a single shutdown signal to every running task.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for one task. Cancelled when the coordinator triggers.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task that triggers shutdown on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => coordinator.trigger(),
                _ = coordinator.token.cancelled() => {}
            }
        })
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Drive `fut` to completion unless `token` is cancelled first.
///
/// Returns `None` on cancellation; `fut` is dropped at its current await point.
/// Cancellation wins when both are ready.
pub async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = fut => Some(output),
    }
}
