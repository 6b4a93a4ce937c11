//! Manifest-update step: point the deployment descriptor at a new image and
//! propose the change for review.
//!
//! The descriptor is fetched fresh from the descriptor repository on every
//! run, rewritten in exactly one field, and submitted as a review request
//! named after the version label. Nothing is applied directly; merging the
//! review is what the external reconciler reacts to.

pub mod github;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::artifact::{ArtifactError, ArtifactRef, ImageRef, VersionLabel};
use crate::config::{REVIEW_BRANCH_PREFIX, REVIEW_TITLE_PREFIX};
use crate::descriptor::{DeploymentDescriptor, DescriptorError};

pub use github::GitHubRepository;

/// Descriptor repository failures
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to fetch descriptor: {0}")]
    Fetch(#[source] RepositoryError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("Failed to open review request: {0}")]
    Review(#[source] RepositoryError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Descriptor content plus the revision it was read at.
#[derive(Debug, Clone)]
pub struct FetchedDescriptor {
    pub content: String,
    /// Opaque revision handle (a blob SHA for git hosts)
    pub revision: String,
}

/// A proposed change to the descriptor repository.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub branch: String,
    pub base_branch: String,
    pub title: String,
    pub commit_message: String,
    pub body: String,
    pub path: String,
    /// Amended descriptor content
    pub content: String,
}

impl ReviewRequest {
    /// Build the review request for promoting `image` (tagged `label`).
    ///
    /// Branch and title are derived only from the label, so re-running the
    /// step for the same label targets the same review.
    pub fn for_label(
        label: &VersionLabel,
        path: &str,
        base_branch: &str,
        previous: &str,
        image: &ImageRef,
        content: String,
    ) -> Self {
        let title = format!("{}{}", REVIEW_TITLE_PREFIX, label);
        let body = format!(
            "Updates `{path}` to the image built from revision `{label}`.\n\n\
             - Previous image: `{previous}`\n\
             - New image: `{image}`\n\n\
             Merging this change lets the reconciler roll the deployment forward.\n"
        );
        Self {
            branch: format!("{}{}", REVIEW_BRANCH_PREFIX, label),
            base_branch: base_branch.to_string(),
            commit_message: title.clone(),
            title,
            body,
            path: path.to_string(),
            content,
        }
    }
}

/// An opened (or reused) review request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewHandle {
    pub number: u64,
    pub url: String,
    pub branch: String,
    /// False when an existing open review for the branch was reused
    pub created: bool,
    /// Amended descriptor, set only when the review was not actually opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Version-controlled store of deployment descriptors.
#[async_trait]
pub trait DescriptorRepository: Send + Sync {
    /// Read `path` at the head of `branch`.
    async fn fetch(&self, path: &str, branch: &str) -> Result<FetchedDescriptor, RepositoryError>;

    /// Commit the amended descriptor to the review branch and open a review
    /// request against the base branch.
    async fn open_review(&self, request: &ReviewRequest) -> Result<ReviewHandle, RepositoryError>;
}

/// Result of the manifest-update step.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// A review request carries the amended descriptor
    Proposed {
        review: ReviewHandle,
        previous: String,
        image: ImageRef,
    },
    /// The descriptor already names the image; nothing to propose
    AlreadyCurrent { image: ImageRef },
}

/// Runs the manifest-update step against a [`DescriptorRepository`].
#[derive(Clone)]
pub struct ManifestUpdater {
    repository: Arc<dyn DescriptorRepository>,
    image_repository: String,
    path: String,
    base_branch: String,
}

impl ManifestUpdater {
    pub fn new(
        repository: Arc<dyn DescriptorRepository>,
        image_repository: impl Into<String>,
        path: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            image_repository: image_repository.into(),
            path: path.into(),
            base_branch: base_branch.into(),
        }
    }

    /// Fetch the descriptor, rewrite its image to `<repository>:<label>`,
    /// and open a review request.
    ///
    /// Fails before any review is opened if the descriptor cannot be fetched
    /// or does not name exactly one image.
    #[tracing::instrument(
        name = "manifest_update",
        skip_all,
        fields(label = %label, path = %self.path)
    )]
    pub async fn update(&self, label: &VersionLabel) -> Result<UpdateOutcome, ManifestError> {
        let image = ArtifactRef::new(self.image_repository.clone(), label.clone())?.image()?;

        let fetched = self
            .repository
            .fetch(&self.path, &self.base_branch)
            .await
            .map_err(ManifestError::Fetch)?;
        tracing::debug!(revision = %fetched.revision, "Fetched descriptor");

        let descriptor = DeploymentDescriptor::parse(fetched.content)?;
        let previous = descriptor.current_image().to_string();
        if previous == image.to_string() {
            tracing::info!(image = %image, "Descriptor already names this image");
            return Ok(UpdateOutcome::AlreadyCurrent { image });
        }

        let content = descriptor.with_image(&image)?;
        let request = ReviewRequest::for_label(
            label,
            &self.path,
            &self.base_branch,
            &previous,
            &image,
            content,
        );

        let review = self
            .repository
            .open_review(&request)
            .await
            .map_err(ManifestError::Review)?;
        tracing::info!(
            pr = review.number,
            url = %review.url,
            branch = %review.branch,
            created = review.created,
            previous = %previous,
            image = %image,
            "Opened review request"
        );

        Ok(UpdateOutcome::Proposed {
            review,
            previous,
            image,
        })
    }
}

/// Reads through to a real repository but only logs the review request.
pub struct DryRunRepository {
    inner: Arc<dyn DescriptorRepository>,
}

impl DryRunRepository {
    pub fn new(inner: Arc<dyn DescriptorRepository>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DescriptorRepository for DryRunRepository {
    async fn fetch(&self, path: &str, branch: &str) -> Result<FetchedDescriptor, RepositoryError> {
        self.inner.fetch(path, branch).await
    }

    async fn open_review(&self, request: &ReviewRequest) -> Result<ReviewHandle, RepositoryError> {
        tracing::info!(
            branch = %request.branch,
            title = %request.title,
            "Dry run: skipping review request"
        );
        Ok(ReviewHandle {
            number: 0,
            url: format!("dry-run://{}", request.branch),
            branch: request.branch.clone(),
            created: false,
            preview: Some(request.content.clone()),
        })
    }
}
