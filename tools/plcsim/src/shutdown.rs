//! Shutdown signal handling

use tracing::warn;

/// Resolve once the operator asks plcsim to stop, naming the signal
pub async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => tokio::select! {
                name = ctrl_c() => name,
                _ = terminate.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), stop plcsim with Ctrl+C", e);
                ctrl_c().await
            },
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
