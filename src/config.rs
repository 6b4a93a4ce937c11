//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines constants for
//! the hello service, the promotion workflow (branch and title naming, command
//! timeouts), logging format, and default paths. `AppConfig` is the root
//! configuration struct containing all settings.

use const_format::formatcp;
use serde::Deserialize;
use std::path::Path;

use crate::artifact::ImageRef;

// =============================================================================
// Hello Service
// =============================================================================

/// Message returned by `GET /` when none is configured
pub const DEFAULT_MESSAGE: &str = "Hello CI/CD World!";

/// Default bind address (all interfaces, matching the container entrypoint)
pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";

/// Default port exposed by the container image
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Seconds to wait for in-flight requests after a shutdown signal
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Hello response - static content, short cache so message changes roll out quickly
pub const HTTP_CACHE_HELLO_MAX_AGE: u32 = 60;

pub const CACHE_CONTROL_HELLO: &str = formatcp!("public, max-age={}", HTTP_CACHE_HELLO_MAX_AGE);

/// Header carrying the request ID in and out
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// =============================================================================
// Promotion Workflow
// =============================================================================

/// Floating tag pushed alongside every revision-specific tag
pub const LATEST_TAG: &str = "latest";

/// Prefix of the review branch; the version label is appended
pub const REVIEW_BRANCH_PREFIX: &str = "update-image-";

/// Prefix of the review title and commit message; the version label is appended
pub const REVIEW_TITLE_PREFIX: &str = "Update image to ";

/// Branch whose pushes trigger a promotion
pub const DEFAULT_TRIGGER_BRANCH: &str = "main";

/// Timeout for a single external command (docker login, buildx build)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 1800;

/// Timeout for descriptor repository and reconciler API requests
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// GitHub REST API base URL
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// User-Agent sent to the descriptor repository and reconciler APIs
pub const USER_AGENT: &str = formatcp!(
    "{}/{}",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION")
);

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default path of the deployment descriptor inside the descriptor repository
pub const DEFAULT_DESCRIPTOR_PATH: &str = "deployment.yaml";

/// Default Dockerfile relative to the build context
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "hello_gitops=info,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub http: HttpServerConfig,
    /// Hello service response
    #[serde(default)]
    pub service: ServiceConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Which pushes start a promotion
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Image build and registry settings
    pub image: ImageConfig,
    /// Descriptor repository settings
    pub manifest: ManifestConfig,
    /// External reconciler to observe (optional)
    pub reconciler: Option<ReconcilerConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    #[serde(default = "HttpServerConfig::default_port")]
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        DEFAULT_HTTP_HOST.to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_HTTP_PORT
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "ServiceConfig::default_message")]
    pub message: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            message: Self::default_message(),
        }
    }
}

impl ServiceConfig {
    fn default_message() -> String {
        DEFAULT_MESSAGE.to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    /// Whether structured JSON output was requested
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Only pushes to this branch are promoted
    #[serde(default = "TriggerConfig::default_branch")]
    pub branch: String,
    /// Truncate the revision to this many characters for the version label.
    /// The full revision is used when unset.
    pub short_sha_len: Option<usize>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            branch: Self::default_branch(),
            short_sha_len: None,
        }
    }
}

impl TriggerConfig {
    fn default_branch() -> String {
        DEFAULT_TRIGGER_BRANCH.to_string()
    }
}

/// Image build and registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Image repository without tag, e.g. "mateoclima/hello-app"
    pub repository: String,
    /// Registry host passed to `docker login`. Docker Hub when unset.
    pub registry: Option<String>,
    /// Build context directory
    #[serde(default = "ImageConfig::default_context")]
    pub context: String,
    /// Dockerfile path relative to the context
    #[serde(default = "ImageConfig::default_dockerfile")]
    pub dockerfile: String,
    /// Target platforms for buildx (e.g. "linux/amd64")
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Timeout for each docker command in seconds
    #[serde(default = "ImageConfig::default_command_timeout")]
    pub command_timeout_seconds: u64,
}

impl ImageConfig {
    fn default_context() -> String {
        ".".to_string()
    }

    fn default_dockerfile() -> String {
        DEFAULT_DOCKERFILE.to_string()
    }

    fn default_command_timeout() -> u64 {
        DEFAULT_COMMAND_TIMEOUT_SECS
    }
}

/// Descriptor repository configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
    /// REST API base URL (default: GitHub)
    #[serde(default = "ManifestConfig::default_api_url")]
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    /// Branch the review request targets
    #[serde(default = "ManifestConfig::default_base_branch")]
    pub base_branch: String,
    /// Path of the deployment descriptor inside the repository
    #[serde(default = "ManifestConfig::default_path")]
    pub path: String,
    /// API request timeout in seconds
    #[serde(default = "ManifestConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl ManifestConfig {
    fn default_api_url() -> String {
        DEFAULT_GITHUB_API_URL.to_string()
    }

    fn default_base_branch() -> String {
        "main".to_string()
    }

    fn default_path() -> String {
        DEFAULT_DESCRIPTOR_PATH.to_string()
    }

    fn default_timeout() -> u64 {
        DEFAULT_API_TIMEOUT_SECS
    }
}

/// External reconciler (Argo CD compatible API)
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Base URL of the reconciler API server
    pub server: String,
    /// Application name watched by the reconciler
    pub application: String,
    #[serde(default = "ReconcilerConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl ReconcilerConfig {
    fn default_timeout() -> u64 {
        DEFAULT_API_TIMEOUT_SECS
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // The repository must be usable as the left side of "<repo>:<tag>"
        ImageRef::parse(&format!("{}:{}", self.image.repository, LATEST_TAG)).map_err(|e| {
            ConfigError::Validation(format!(
                "image.repository '{}' is not a valid image repository: {}",
                self.image.repository, e
            ))
        })?;

        if self.manifest.owner.trim().is_empty() || self.manifest.repo.trim().is_empty() {
            return Err(ConfigError::Validation(
                "manifest.owner and manifest.repo must be set".to_string(),
            ));
        }

        if self.manifest.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "manifest.path must not be empty".to_string(),
            ));
        }

        if self.trigger.short_sha_len == Some(0) {
            return Err(ConfigError::Validation(
                "trigger.short_sha_len must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
