//! Health check endpoint for container orchestration.
//!
//! Liveness probe for the Kubernetes deployment: returns 200 OK whenever the
//! process can answer HTTP.

/// Health check handler.
pub async fn health() -> &'static str {
    "ok"
}
