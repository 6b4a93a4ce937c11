//! `docker` CLI implementation of [`ImageBuilder`].
//!
//! Login goes through `docker login --password-stdin`; builds go through
//! `docker buildx build --push` so multi-platform images are pushed in one
//! command.

use std::time::Duration;

use async_trait::async_trait;

use super::command::{self, CommandSpec};
use super::{BuildRequest, ImageBuilder, PublishError};
use crate::artifact::ImageRef;
use crate::credentials::RegistryCredentials;

/// OCI annotation recording the source revision
const REVISION_LABEL: &str = "org.opencontainers.image.revision";

/// Registry replies that mean the tag does not exist
const MISSING_MARKERS: [&str; 2] = ["not found", "manifest unknown"];

#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "docker".to_string(),
            timeout,
        }
    }

    /// Use a different executable (e.g. `podman`, or a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn login_args(registry: Option<&str>, credentials: &RegistryCredentials) -> Vec<String> {
        let mut args = vec![
            "login".to_string(),
            "--username".to_string(),
            credentials.username.clone(),
            "--password-stdin".to_string(),
        ];
        if let Some(registry) = registry {
            args.push(registry.to_string());
        }
        args
    }

    fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "buildx".to_string(),
            "build".to_string(),
            "--push".to_string(),
            "--file".to_string(),
            request.dockerfile.display().to_string(),
        ];
        if !request.platforms.is_empty() {
            args.push("--platform".to_string());
            args.push(request.platforms.join(","));
        }
        for tag in &request.tags {
            args.push("--tag".to_string());
            args.push(tag.to_string());
        }
        args.push("--label".to_string());
        args.push(format!("{}={}", REVISION_LABEL, request.revision));
        args.push(request.context.display().to_string());
        args
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn login(
        &self,
        registry: Option<&str>,
        credentials: &RegistryCredentials,
    ) -> Result<(), PublishError> {
        if credentials.password.is_empty() {
            return Err(PublishError::Auth("registry password is empty".to_string()));
        }

        let spec = CommandSpec::new(
            "docker login",
            &self.program,
            Self::login_args(registry, credentials),
        )
        .with_stdin(credentials.password.clone())
        .with_timeout(self.timeout);

        let output = command::run(&spec)
            .await
            .map_err(|e| PublishError::Auth(e.to_string()))?;
        if !output.success {
            return Err(PublishError::Auth(output.error_summary()));
        }
        Ok(())
    }

    async fn build_and_push(&self, request: &BuildRequest) -> Result<(), PublishError> {
        let spec = CommandSpec::new("docker buildx build", &self.program, Self::build_args(request))
            .with_timeout(self.timeout);

        let output = command::run(&spec)
            .await
            .map_err(|e| PublishError::Build(e.to_string()))?;
        if !output.success {
            tracing::error!(
                exit_code = output.exit_code,
                stderr = %output.stderr,
                "Image build failed"
            );
            return Err(PublishError::Build(output.error_summary()));
        }
        tracing::debug!(duration_ms = output.duration_ms, "Image built and pushed");
        Ok(())
    }

    async fn exists(&self, image: &ImageRef) -> Result<bool, PublishError> {
        let args = vec![
            "buildx".to_string(),
            "imagetools".to_string(),
            "inspect".to_string(),
            image.to_string(),
        ];
        let spec = CommandSpec::new("docker buildx imagetools inspect", &self.program, args)
            .with_timeout(self.timeout);

        let output = command::run(&spec)
            .await
            .map_err(|e| PublishError::Inspect(e.to_string()))?;
        if output.success {
            return Ok(true);
        }
        let stderr = output.stderr.to_lowercase();
        if MISSING_MARKERS.iter().any(|marker| stderr.contains(marker)) {
            return Ok(false);
        }
        Err(PublishError::Inspect(output.error_summary()))
    }
}
