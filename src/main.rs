//! hello-gitops: hello service and image-promotion workflow.
//!
//! This is the binary entry point. It initializes tracing, loads configuration
//! from TOML files, reads credentials from the environment, and dispatches to
//! the hello service or one of the workflow steps.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hello_gitops::artifact::{ImageRef, VersionLabel};
use hello_gitops::config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use hello_gitops::credentials::{RegistryCredentials, Secret};
use hello_gitops::descriptor::DeploymentDescriptor;
use hello_gitops::http::start_server;
use hello_gitops::manifest::{
    DescriptorRepository, DryRunRepository, GitHubRepository, ManifestUpdater,
};
use hello_gitops::pipeline::{Promotion, PushEvent};
use hello_gitops::publish::{DockerCli, DryRunBuilder, ImageBuilder, Publisher};
use hello_gitops::reconcile::{ArgoCdClient, Reconciler};
use hello_gitops::routes::create_router;
use hello_gitops::state::AppState;

/// hello-gitops: hello service and GitOps image promotion
#[derive(Parser, Debug)]
#[command(name = "hello-gitops", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "hello_gitops=debug,tower_http=info")
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hello service
    Serve,

    /// Build and push the image for a revision
    Publish {
        /// Commit SHA to publish
        #[arg(long, env = "GITHUB_SHA")]
        revision: String,

        /// Build context (overrides image.context)
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        registry: RegistryArgs,
    },

    /// Point the deployment descriptor at a published revision and open a review
    UpdateManifest {
        /// Commit SHA whose image should be deployed
        #[arg(long, env = "GITHUB_SHA")]
        revision: String,

        #[command(flatten)]
        manifest: ManifestArgs,
    },

    /// Run publish then manifest update for a push
    Promote {
        /// Commit SHA of the push
        #[arg(long, env = "GITHUB_SHA")]
        revision: String,

        /// Pushed branch or full ref (refs/heads/<branch>)
        #[arg(long, env = "GITHUB_REF")]
        branch: String,

        /// Log and print instead of pushing images or opening reviews
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        registry: RegistryArgs,

        #[command(flatten)]
        manifest: ManifestArgs,
    },

    /// Rewrite the image of a local descriptor and print the result
    Rewrite {
        /// Deployment descriptor to read
        #[arg(long)]
        file: PathBuf,

        /// New image reference (<repository>:<tag>)
        #[arg(long)]
        image: String,
    },

    /// Show what the reconciler has converged to
    Status {
        /// Check that this revision's image is live
        #[arg(long)]
        revision: Option<String>,

        #[arg(long, env = "ARGOCD_TOKEN", hide_env_values = true)]
        argocd_token: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct RegistryArgs {
    #[arg(long, env = "REGISTRY_USERNAME")]
    registry_username: Option<String>,

    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ManifestArgs {
    #[arg(long, env = "MANIFEST_REPO_TOKEN", hide_env_values = true)]
    manifest_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0} is not set")]
    MissingSecret(&'static str),

    #[error("[reconciler] is not configured")]
    NoReconciler,
}

impl RegistryArgs {
    fn credentials(&self, dry_run: bool) -> Result<RegistryCredentials, CliError> {
        if dry_run {
            return Ok(RegistryCredentials::new(
                self.registry_username.clone().unwrap_or_default(),
                Secret::new(self.registry_password.clone().unwrap_or_default()),
            ));
        }
        let username = self
            .registry_username
            .clone()
            .ok_or(CliError::MissingSecret("REGISTRY_USERNAME"))?;
        let password = self
            .registry_password
            .clone()
            .ok_or(CliError::MissingSecret("REGISTRY_PASSWORD"))?;
        Ok(RegistryCredentials::new(username, Secret::new(password)))
    }
}

impl ManifestArgs {
    fn token(&self) -> Result<Secret, CliError> {
        self.manifest_token
            .clone()
            .map(Secret::new)
            .ok_or(CliError::MissingSecret("MANIFEST_REPO_TOKEN"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Rewrite works on a local file and needs no configuration
    if let Command::Rewrite { file, image } = &args.command {
        init_tracing(args.log_level.clone(), &LoggingConfig::default());
        return rewrite(file, image);
    }

    let config = AppConfig::load(&args.config)?;
    init_tracing(args.log_level.clone(), &config.logging);
    tracing::info!(path = %args.config, "Loaded configuration");

    match args.command {
        Command::Serve => serve(config).await,
        Command::Publish {
            revision,
            context,
            registry,
        } => {
            let mut image = config.image.clone();
            if let Some(context) = context {
                image.context = context;
            }
            let label = VersionLabel::from_revision(&revision, config.trigger.short_sha_len)?;
            let builder = docker(&config);
            let published = Publisher::new(builder, image)
                .publish(&label, &registry.credentials(false)?)
                .await?;
            print_json(&published)
        }
        Command::UpdateManifest { revision, manifest } => {
            let repository: Arc<dyn DescriptorRepository> =
                Arc::new(GitHubRepository::new(&config.manifest, manifest.token()?)?);
            let promotion = Promotion::new(
                config.trigger.clone(),
                Publisher::new(docker(&config), config.image.clone()),
                updater(&config, repository),
            );
            let outcome = promotion.update_published(&revision).await?;
            print_json(&outcome)
        }
        Command::Promote {
            revision,
            branch,
            dry_run,
            registry,
            manifest,
        } => {
            let credentials = registry.credentials(dry_run)?;
            let github: Arc<dyn DescriptorRepository> =
                Arc::new(GitHubRepository::new(&config.manifest, manifest.token()?)?);
            let builder: Arc<dyn ImageBuilder>;
            let repository: Arc<dyn DescriptorRepository>;
            if dry_run {
                tracing::warn!("Dry run: no image will be pushed and no review opened");
                builder = Arc::new(DryRunBuilder);
                repository = Arc::new(DryRunRepository::new(github));
            } else {
                builder = docker(&config);
                repository = github;
            }

            let promotion = Promotion::new(
                config.trigger.clone(),
                Publisher::new(builder, config.image.clone()),
                updater(&config, repository),
            );
            let event = PushEvent::from_ref(&branch, revision);
            match promotion.run(&event, &credentials).await {
                Ok(report) => print_json(&report),
                Err(failed) => {
                    print_json(&failed.report)?;
                    Err(failed.into())
                }
            }
        }
        // Handled before configuration is loaded
        Command::Rewrite { .. } => Ok(()),
        Command::Status {
            revision,
            argocd_token,
        } => {
            let reconciler_config = config.reconciler.as_ref().ok_or(CliError::NoReconciler)?;
            let token = argocd_token.ok_or(CliError::MissingSecret("ARGOCD_TOKEN"))?;
            let client = ArgoCdClient::new(reconciler_config, Secret::new(token))?;
            let state = client.observe().await?;
            print_json(&state)?;

            if let Some(revision) = revision {
                let label = VersionLabel::from_revision(&revision, config.trigger.short_sha_len)?;
                let image = ImageRef::parse(&format!("{}:{}", config.image.repository, label))?;
                if !state.is_running(&image) {
                    return Err(format!("{} is not live yet", image).into());
                }
                tracing::info!(image = %image, "Image is live");
            }
            Ok(())
        }
    }
}

/// Initialize tracing with priority: CLI > env > default
fn init_tracing(cli_filter: Option<String>, logging: &LoggingConfig) {
    let log_filter = cli_filter
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let filter = tracing_subscriber::EnvFilter::new(&log_filter);

    // Logs go to stderr; stdout carries the JSON reports
    if logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(message = %config.service.message, "Starting hello service");
    let app = create_router(AppState::new(config.service.clone()));
    start_server(app, &config.http).await?;
    Ok(())
}

fn rewrite(file: &Path, image: &str) -> Result<(), Box<dyn std::error::Error>> {
    let image = ImageRef::parse(image)?;
    let descriptor = DeploymentDescriptor::parse(std::fs::read_to_string(file)?)?;
    tracing::info!(
        file = %file.display(),
        previous = %descriptor.current_image(),
        image = %image,
        "Rewriting descriptor image"
    );
    print!("{}", descriptor.with_image(&image)?);
    Ok(())
}

fn docker(config: &AppConfig) -> Arc<dyn ImageBuilder> {
    Arc::new(DockerCli::new(Duration::from_secs(
        config.image.command_timeout_seconds,
    )))
}

fn updater(config: &AppConfig, repository: Arc<dyn DescriptorRepository>) -> ManifestUpdater {
    ManifestUpdater::new(
        repository,
        config.image.repository.clone(),
        config.manifest.path.clone(),
        config.manifest.base_branch.clone(),
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
