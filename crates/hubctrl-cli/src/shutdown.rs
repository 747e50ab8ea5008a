//! Signal handling and orderly teardown.

use hubctrl_core::GpioBridge;
use hubctrl_core::config::defaults;
use std::time::Duration;

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

/// Release every pin and close the GPIO backend, bounded by a timeout.
pub async fn release_pins(bridge: GpioBridge) {
    match tokio::time::timeout(
        Duration::from_secs(defaults::SHUTDOWN_TIMEOUT_SECS),
        bridge.shutdown(),
    )
    .await
    {
        Ok(Ok(())) => tracing::info!("GPIO released"),
        Ok(Err(e)) => tracing::warn!("GPIO shutdown error: {}", e),
        Err(_) => tracing::warn!(
            "GPIO shutdown timed out after {} seconds",
            defaults::SHUTDOWN_TIMEOUT_SECS
        ),
    }
}
