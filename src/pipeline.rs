//! Promotion pipeline: push event → publish → manifest update.
//!
//! The two steps run strictly in order. The manifest update never starts
//! unless the publish step succeeded, and every run produces a report with
//! the status of each step so the hosting platform can show what happened.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifact::VersionLabel;
use crate::config::TriggerConfig;
use crate::credentials::RegistryCredentials;
use crate::error::{FailureKind, PromoteError};
use crate::manifest::{ManifestUpdater, UpdateOutcome};
use crate::publish::{PublishedArtifact, Publisher};

const HEADS_PREFIX: &str = "refs/heads/";

/// A code change on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    pub branch: String,
    /// Commit SHA of the pushed revision
    pub revision: String,
}

impl PushEvent {
    pub fn new(branch: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            revision: revision.into(),
        }
    }

    /// Build from a full git ref such as `refs/heads/main`.
    pub fn from_ref(git_ref: &str, revision: impl Into<String>) -> Self {
        let branch = git_ref.strip_prefix(HEADS_PREFIX).unwrap_or(git_ref);
        Self::new(branch, revision)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    Skipped,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StepReport {
    fn not_started() -> Self {
        Self {
            status: StepStatus::NotStarted,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    fn start(&mut self) {
        self.started_at = Some(Utc::now());
    }

    fn finish(&mut self, error: Option<&PromoteError>) {
        self.finished_at = Some(Utc::now());
        match error {
            Some(err) => {
                self.status = StepStatus::Failed;
                self.error = Some(err.to_string());
            }
            None => self.status = StepStatus::Succeeded,
        }
    }
}

/// Outcome of one promotion run.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub event: PushEvent,
    pub label: Option<VersionLabel>,
    pub publish: StepReport,
    pub manifest_update: StepReport,
    pub published: Option<PublishedArtifact>,
    pub update: Option<UpdateOutcome>,
    pub failure: Option<FailureKind>,
}

impl PromotionReport {
    fn new(event: &PushEvent) -> Self {
        Self {
            event: event.clone(),
            label: None,
            publish: StepReport::not_started(),
            manifest_update: StepReport::not_started(),
            published: None,
            update: None,
            failure: None,
        }
    }

    /// True when the push was not on the trigger branch.
    pub fn skipped(&self) -> bool {
        self.publish.status == StepStatus::Skipped
    }
}

/// A promotion that stopped at a failed step.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PromotionFailed {
    pub report: Box<PromotionReport>,
    #[source]
    pub error: PromoteError,
}

/// The two-step promotion workflow.
pub struct Promotion {
    trigger: TriggerConfig,
    publisher: Publisher,
    updater: ManifestUpdater,
}

impl Promotion {
    pub fn new(trigger: TriggerConfig, publisher: Publisher, updater: ManifestUpdater) -> Self {
        Self {
            trigger,
            publisher,
            updater,
        }
    }

    /// Run the workflow for a push event.
    ///
    /// Pushes to other branches are skipped. Registry credentials are used
    /// only by the publish step.
    #[tracing::instrument(
        name = "promote",
        skip_all,
        fields(branch = %event.branch, revision = %event.revision)
    )]
    pub async fn run(
        &self,
        event: &PushEvent,
        credentials: &RegistryCredentials,
    ) -> Result<PromotionReport, PromotionFailed> {
        let mut report = PromotionReport::new(event);

        if event.branch != self.trigger.branch {
            tracing::info!(
                trigger_branch = %self.trigger.branch,
                "Push is not on the trigger branch, skipping promotion"
            );
            report.publish.status = StepStatus::Skipped;
            report.manifest_update.status = StepStatus::Skipped;
            return Ok(report);
        }

        let label = match VersionLabel::from_revision(&event.revision, self.trigger.short_sha_len) {
            Ok(label) => label,
            Err(err) => return Err(fail(report, PromoteError::from(err))),
        };
        report.label = Some(label.clone());

        report.publish.start();
        match self.publisher.publish(&label, credentials).await {
            Ok(published) => {
                report.publish.finish(None);
                report.published = Some(published);
            }
            Err(err) => {
                let err = PromoteError::from(err);
                report.publish.finish(Some(&err));
                tracing::error!(error = %err, "Publish failed, manifest update will not run");
                return Err(fail(report, err));
            }
        }

        report.manifest_update.start();
        match self.updater.update(&label).await {
            Ok(outcome) => {
                report.manifest_update.finish(None);
                report.update = Some(outcome);
            }
            Err(err) => {
                let err = PromoteError::from(err);
                report.manifest_update.finish(Some(&err));
                tracing::error!(error = %err, "Manifest update failed");
                return Err(fail(report, err));
            }
        }

        tracing::info!(label = %label, "Promotion complete");
        Ok(report)
    }

    /// Run only the manifest update for an earlier push.
    ///
    /// The registry must already hold the revision-specific image, so a
    /// review never points the descriptor at an image that was not published.
    #[tracing::instrument(name = "update_published", skip_all, fields(revision = %revision))]
    pub async fn update_published(&self, revision: &str) -> Result<UpdateOutcome, PromoteError> {
        let label = VersionLabel::from_revision(revision, self.trigger.short_sha_len)?;
        self.publisher.ensure_published(&label).await?;
        Ok(self.updater.update(&label).await?)
    }
}

fn fail(mut report: PromotionReport, error: PromoteError) -> PromotionFailed {
    report.failure = Some(error.kind());
    PromotionFailed {
        report: Box::new(report),
        error,
    }
}
