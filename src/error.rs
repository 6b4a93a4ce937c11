use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::artifact::ArtifactError;
use crate::manifest::ManifestError;
use crate::publish::PublishError;

/// Errors surfaced by the hello service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        (status, Json(serde_json::json!({ "detail": message }))).into_response()
    }
}

/// Failure classes of a promotion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The push could not be turned into a version label
    Trigger,
    /// Registry login failed; nothing was published
    Auth,
    /// Build or push failed; the workflow stopped
    Publish,
    /// Descriptor unreachable or not rewritable; no review was opened
    ManifestUpdate,
    /// The amended descriptor could not be proposed
    ReviewRequest,
}

/// A failed promotion. There is no retry and no rollback: recovery is a
/// re-run or a manual revert.
#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("Invalid revision: {0}")]
    Trigger(#[from] ArtifactError),

    #[error(transparent)]
    Auth(PublishError),

    #[error(transparent)]
    Publish(PublishError),

    #[error("Manifest update failed: {0}")]
    ManifestUpdate(#[source] ManifestError),

    #[error(transparent)]
    ReviewRequest(ManifestError),
}

impl PromoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PromoteError::Trigger(_) => FailureKind::Trigger,
            PromoteError::Auth(_) => FailureKind::Auth,
            PromoteError::Publish(_) => FailureKind::Publish,
            PromoteError::ManifestUpdate(_) => FailureKind::ManifestUpdate,
            PromoteError::ReviewRequest(_) => FailureKind::ReviewRequest,
        }
    }
}

impl From<PublishError> for PromoteError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Auth(_) => PromoteError::Auth(err),
            _ => PromoteError::Publish(err),
        }
    }
}

impl From<ManifestError> for PromoteError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Review(_) => PromoteError::ReviewRequest(err),
            _ => PromoteError::ManifestUpdate(err),
        }
    }
}
