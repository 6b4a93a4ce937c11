//! Publish step: build the image and push it under its version label.
//!
//! Every publish pushes two tags, the immutable revision-specific one and the
//! floating `latest`. The label is handed forward verbatim to the manifest
//! update. Authentication happens before anything is built, so a login
//! failure leaves the registry untouched.

pub mod command;
pub mod docker;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::artifact::{ArtifactError, ArtifactRef, ImageRef, VersionLabel};
use crate::config::ImageConfig;
use crate::credentials::RegistryCredentials;

pub use docker::DockerCli;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Registry authentication failed: {0}")]
    Auth(String),

    #[error("Image build or push failed: {0}")]
    Build(String),

    #[error("Image {0} has not been published")]
    NotPublished(ImageRef),

    #[error("Registry lookup failed: {0}")]
    Inspect(String),

    #[error("Invalid artifact: {0}")]
    Artifact(#[from] ArtifactError),
}

/// What to build and where to push it.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Build context (the content snapshot)
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub platforms: Vec<String>,
    /// Revision-specific tag first
    pub tags: Vec<ImageRef>,
    /// Source revision, recorded as an image label
    pub revision: VersionLabel,
}

/// Container image builder and registry client.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Authenticate to the registry (`None` = the builder's default registry).
    async fn login(
        &self,
        registry: Option<&str>,
        credentials: &RegistryCredentials,
    ) -> Result<(), PublishError>;

    /// Build the image and push every tag in the request.
    async fn build_and_push(&self, request: &BuildRequest) -> Result<(), PublishError>;

    /// Whether `image` is present in the registry.
    async fn exists(&self, image: &ImageRef) -> Result<bool, PublishError>;
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedArtifact {
    pub label: VersionLabel,
    /// The revision-specific reference the manifest update will point at
    pub image: ImageRef,
    /// Every tag pushed
    pub tags: Vec<ImageRef>,
}

/// Runs the publish step against an [`ImageBuilder`].
#[derive(Clone)]
pub struct Publisher {
    builder: Arc<dyn ImageBuilder>,
    config: ImageConfig,
}

impl Publisher {
    pub fn new(builder: Arc<dyn ImageBuilder>, config: ImageConfig) -> Self {
        Self { builder, config }
    }

    /// Log in, then build and push `<repository>:<label>` (and `latest`).
    #[tracing::instrument(name = "publish", skip_all, fields(label = %label))]
    pub async fn publish(
        &self,
        label: &VersionLabel,
        credentials: &RegistryCredentials,
    ) -> Result<PublishedArtifact, PublishError> {
        let artifact = ArtifactRef::new(self.config.repository.clone(), label.clone())?;
        let tags = artifact.tags()?;
        let image = artifact.image()?;

        self.builder
            .login(self.config.registry.as_deref(), credentials)
            .await?;
        tracing::info!(
            registry = self.config.registry.as_deref().unwrap_or("default"),
            username = %credentials.username,
            "Authenticated to registry"
        );

        let context = PathBuf::from(&self.config.context);
        let request = BuildRequest {
            dockerfile: context.join(&self.config.dockerfile),
            context,
            platforms: self.config.platforms.clone(),
            tags: tags.clone(),
            revision: label.clone(),
        };
        self.builder.build_and_push(&request).await?;

        tracing::info!(
            image = %image,
            tags = ?tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Published image"
        );

        Ok(PublishedArtifact {
            label: label.clone(),
            image,
            tags,
        })
    }

    /// The revision-specific image for `label`, provided the registry has it.
    ///
    /// Used when the manifest update runs on its own, to keep it behind a
    /// publish that already happened.
    #[tracing::instrument(name = "check_published", skip_all, fields(label = %label))]
    pub async fn ensure_published(&self, label: &VersionLabel) -> Result<ImageRef, PublishError> {
        let image = ArtifactRef::new(self.config.repository.clone(), label.clone())?.image()?;
        if !self.builder.exists(&image).await? {
            return Err(PublishError::NotPublished(image));
        }
        tracing::debug!(image = %image, "Image is published");
        Ok(image)
    }
}

/// Builder that only logs what it would do (dry runs).
#[derive(Debug, Default, Clone)]
pub struct DryRunBuilder;

#[async_trait]
impl ImageBuilder for DryRunBuilder {
    async fn login(
        &self,
        registry: Option<&str>,
        credentials: &RegistryCredentials,
    ) -> Result<(), PublishError> {
        tracing::info!(
            registry = registry.unwrap_or("default"),
            username = %credentials.username,
            "Dry run: skipping registry login"
        );
        Ok(())
    }

    async fn build_and_push(&self, request: &BuildRequest) -> Result<(), PublishError> {
        tracing::info!(
            context = %request.context.display(),
            tags = ?request.tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Dry run: skipping image build and push"
        );
        Ok(())
    }

    async fn exists(&self, image: &ImageRef) -> Result<bool, PublishError> {
        tracing::info!(image = %image, "Dry run: assuming image is published");
        Ok(true)
    }
}
