//! The single public endpoint.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: String,
}

/// `GET /` - fixed JSON greeting.
#[instrument(name = "hello::root", skip(state))]
pub async fn root(State(state): State<AppState>) -> Json<HelloResponse> {
    Json(HelloResponse {
        message: state.service.message.clone(),
    })
}

/// Fallback for unknown paths.
pub async fn not_found() -> AppError {
    AppError::NotFound("Not Found".to_string())
}
