//! HTTP server startup logic.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::{HttpServerConfig, SHUTDOWN_GRACE_SECS};

use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid http.host or http.port: {0}")]
    Address(String),

    #[error("Failed to bind server: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Start the HTTP server.
///
/// This function blocks until the server shuts down.
pub async fn start_server(app: Router, config: &HttpServerConfig) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e: std::net::AddrParseError| ServerError::Address(e.to_string()))?;

    let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
    tracing::info!(%addr, "Starting HTTP server");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown::setup_shutdown_handler(shutdown_tx);

    let mut drain_rx = shutdown_rx.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for(shutdown_rx))
        .into_future();

    let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
    let deadline = async move {
        shutdown::signalled(&mut drain_rx).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(ServerError::Server)?;
            tracing::info!("Server stopped");
        }
        _ = deadline => {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE_SECS,
                "Connections still open after grace period, stopping anyway"
            );
        }
    }

    Ok(())
}
