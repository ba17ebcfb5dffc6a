//! Graceful-shutdown plumbing for the binary.

use std::sync::{Arc, atomic::AtomicBool};

use tokio_util::sync::CancellationToken;

/// Resolves when the process receives Ctrl-C or SIGTERM.
pub async fn default_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("could not install Ctrl-C handler: {err:?}");
        }
    };
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    tracing::error!("could not install SIGTERM handler: {err:?}");
                    ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Spawns a task that cancels the returned token once `signal` resolves.
///
/// The returned flag starts out `true`; the binary flips it when shutdown
/// did not finish inside the configured budget, and uses it for the exit
/// code.
pub fn spawn_shutdown_task(
    signal: impl Future<Output = ()> + Send + 'static,
) -> (CancellationToken, Arc<AtomicBool>) {
    let cancellation_token = CancellationToken::new();
    let is_graceful_shutdown = Arc::new(AtomicBool::new(true));
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            signal.await;
            tracing::info!("shutdown signal received");
            cancellation_token.cancel();
        }
    });
    (cancellation_token, is_graceful_shutdown)
}
