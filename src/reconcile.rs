//! External reconciler, observed but never reimplemented.
//!
//! The continuous-deployment operator watches the descriptor repository and
//! converges the cluster. This module only asks it what it has converged to,
//! through an Argo CD compatible `applications` API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::artifact::ImageRef;
use crate::config::{ReconcilerConfig, USER_AGENT as CLIENT_USER_AGENT};
use crate::credentials::Secret;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Reconciler request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Reconciler returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Application '{0}' not found")]
    NotFound(String),
}

/// What the reconciler reports as live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvergedState {
    /// "Synced" / "OutOfSync" / "Unknown"
    pub sync_status: String,
    /// "Healthy" / "Progressing" / "Degraded" / ...
    pub health_status: String,
    /// Descriptor repository revision the cluster was synced to
    pub revision: Option<String>,
    /// Images running in the application's workloads
    pub images: Vec<String>,
}

impl ConvergedState {
    pub fn is_synced(&self) -> bool {
        self.sync_status == "Synced"
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status == "Healthy"
    }

    /// Synced, healthy and running `image`.
    pub fn is_running(&self, image: &ImageRef) -> bool {
        let wanted = image.to_string();
        self.is_synced() && self.is_healthy() && self.images.iter().any(|i| *i == wanted)
    }
}

/// Continuous-deployment operator that converges the cluster to the
/// descriptor repository.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn observe(&self) -> Result<ConvergedState, ReconcileError>;
}

#[derive(Debug, Deserialize)]
struct Application {
    #[serde(default)]
    status: ApplicationStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationStatus {
    #[serde(default)]
    sync: SyncStatus,
    #[serde(default)]
    health: HealthStatus,
    #[serde(default)]
    summary: Summary,
}

#[derive(Debug, Default, Deserialize)]
struct SyncStatus {
    #[serde(default)]
    status: String,
    revision: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthStatus {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct Summary {
    #[serde(default)]
    images: Vec<String>,
}

/// Argo CD API client for a single application.
#[derive(Clone)]
pub struct ArgoCdClient {
    client: reqwest::Client,
    server: String,
    application: String,
    token: Secret,
}

impl ArgoCdClient {
    pub fn new(config: &ReconcilerConfig, token: Secret) -> Result<Self, ReconcileError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            server: config.server.trim_end_matches('/').to_string(),
            application: config.application.clone(),
            token,
        })
    }

    fn application_url(&self) -> String {
        format!(
            "{}/api/v1/applications/{}",
            self.server,
            urlencoding::encode(&self.application)
        )
    }
}

#[async_trait]
impl Reconciler for ArgoCdClient {
    async fn observe(&self) -> Result<ConvergedState, ReconcileError> {
        let response = self
            .client
            .get(self.application_url())
            .bearer_auth(self.token.expose())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReconcileError::NotFound(self.application.clone()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReconcileError::Status {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        let application: Application = response.json().await?;
        let state = ConvergedState {
            sync_status: application.status.sync.status,
            health_status: application.status.health.status,
            revision: application.status.sync.revision,
            images: application.status.summary.images,
        };
        tracing::debug!(
            application = %self.application,
            sync = %state.sync_status,
            health = %state.health_status,
            "Observed reconciler state"
        );
        Ok(state)
    }
}
