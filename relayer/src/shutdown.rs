//! Cooperative graceful shutdown: a single [`CancellationToken`] shared by
//! every long-running task, tripped on `SIGINT`/`SIGTERM` (or programmatically
//! in tests). Each task's own `select!` loop is responsible for returning
//! promptly once the token cancels; this module only owns the signal wiring.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns a task that waits for `SIGINT` or `SIGTERM` and cancels `token`
/// when either arrives. Returns immediately; the signal wait happens in the
/// background.
pub fn install_signal_handlers(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, cancelling all tasks");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_the_token_is_observed_by_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.unwrap();
    }
}
