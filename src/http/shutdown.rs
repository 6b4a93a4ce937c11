//! Graceful shutdown and signal handling.

use tokio::sync::watch;

/// Setup graceful shutdown on SIGTERM and SIGINT.
///
/// When either signal is received the sender flips to `true`. The server
/// then stops accepting new connections and drains the existing ones.
pub fn setup_shutdown_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        let _ = shutdown.send(true);
        tracing::info!(
            grace_secs = crate::config::SHUTDOWN_GRACE_SECS,
            "Graceful shutdown initiated, waiting for connections to close"
        );
    });
}

/// Resolves once shutdown has been requested.
pub async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    signalled(&mut shutdown).await;
}

/// Resolves once the flag is `true`. A dropped sender never resolves.
pub async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signalled_after_send() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), signalled(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_not_signalled_without_send() {
        let (_tx, rx) = watch::channel(false);
        let waited = tokio::time::timeout(Duration::from_millis(50), wait_for(rx)).await;
        assert!(waited.is_err());
    }
}
