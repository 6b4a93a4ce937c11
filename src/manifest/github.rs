//! GitHub REST API implementation of [`DescriptorRepository`].
//!
//! Reads descriptors through the contents API and proposes changes by
//! creating a branch, committing the amended file to it, and opening a pull
//! request. Each step tolerates having been done before, so re-running the
//! manifest update for the same label reuses the same branch and pull request.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{DescriptorRepository, FetchedDescriptor, RepositoryError, ReviewHandle, ReviewRequest};
use crate::config::{ManifestConfig, USER_AGENT as CLIENT_USER_AGENT};
use crate::credentials::Secret;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
}

/// Descriptor repository hosted on GitHub (or a GitHub Enterprise API URL).
#[derive(Clone)]
pub struct GitHubRepository {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    token: Secret,
}

impl GitHubRepository {
    pub fn new(config: &ManifestConfig, token: Secret) -> Result<Self, RepositoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            token,
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.repo, suffix)
    }

    fn contents_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        self.repo_url(&format!("contents/{}", encoded.join("/")))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose())
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    /// Read a file on a branch; `None` when the file or branch is missing.
    async fn get_contents(
        &self,
        path: &str,
        branch: &str,
    ) -> Result<Option<ContentsResponse>, RepositoryError> {
        let response = self
            .request(Method::GET, self.contents_url(path))
            .query(&[("ref", branch)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let contents = check_status(response).await?.json().await?;
        Ok(Some(contents))
    }

    async fn branch_head(&self, branch: &str) -> Result<String, RepositoryError> {
        let url = self.repo_url(&format!("git/ref/heads/{}", urlencoding::encode(branch)));
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RepositoryError::NotFound(format!("branch '{}'", branch)));
        }
        let reference: RefResponse = check_status(response).await?.json().await?;
        Ok(reference.object.sha)
    }

    /// Create `branch` at `sha`. Returns false if it already existed.
    async fn create_branch(&self, branch: &str, sha: &str) -> Result<bool, RepositoryError> {
        let response = self
            .request(Method::POST, self.repo_url("git/refs"))
            .json(&json!({ "ref": format!("refs/heads/{}", branch), "sha": sha }))
            .send()
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            tracing::debug!(branch = %branch, "Review branch already exists");
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }

    /// Commit the amended descriptor to the review branch unless it already
    /// holds exactly that content.
    async fn commit_descriptor(&self, request: &ReviewRequest) -> Result<(), RepositoryError> {
        let existing = self
            .get_contents(&request.path, &request.branch)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "{} on branch '{}'",
                    request.path, request.branch
                ))
            })?;

        if decode_content(&existing)? == request.content {
            tracing::debug!(branch = %request.branch, "Review branch already holds the descriptor");
            return Ok(());
        }

        let response = self
            .request(Method::PUT, self.contents_url(&request.path))
            .json(&json!({
                "message": request.commit_message,
                "content": BASE64.encode(request.content.as_bytes()),
                "sha": existing.sha,
                "branch": request.branch,
            }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn find_open_pull(&self, branch: &str) -> Result<Option<PullResponse>, RepositoryError> {
        let head = format!("{}:{}", self.owner, branch);
        let response = self
            .request(Method::GET, self.repo_url("pulls"))
            .query(&[("head", head.as_str()), ("state", "open")])
            .send()
            .await?;
        let mut pulls: Vec<PullResponse> = check_status(response).await?.json().await?;
        Ok(if pulls.is_empty() {
            None
        } else {
            Some(pulls.remove(0))
        })
    }
}

#[async_trait]
impl DescriptorRepository for GitHubRepository {
    async fn fetch(&self, path: &str, branch: &str) -> Result<FetchedDescriptor, RepositoryError> {
        let contents = self
            .get_contents(path, branch)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("{} on branch '{}'", path, branch)))?;
        Ok(FetchedDescriptor {
            content: decode_content(&contents)?,
            revision: contents.sha,
        })
    }

    async fn open_review(&self, request: &ReviewRequest) -> Result<ReviewHandle, RepositoryError> {
        let base_sha = self.branch_head(&request.base_branch).await?;
        let created_branch = self.create_branch(&request.branch, &base_sha).await?;
        tracing::debug!(branch = %request.branch, created = created_branch, "Review branch ready");

        self.commit_descriptor(request).await?;

        let response = self
            .request(Method::POST, self.repo_url("pulls"))
            .json(&json!({
                "title": request.title,
                "head": request.branch,
                "base": request.base_branch,
                "body": request.body,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            // A pull request for this branch is already open
            let existing = self.find_open_pull(&request.branch).await?.ok_or_else(|| {
                RepositoryError::Status {
                    status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                    message: format!("could not open a pull request for '{}'", request.branch),
                }
            })?;
            return Ok(ReviewHandle {
                number: existing.number,
                url: existing.html_url,
                branch: request.branch.clone(),
                created: false,
                preview: None,
            });
        }

        let pull: PullResponse = check_status(response).await?.json().await?;
        Ok(ReviewHandle {
            number: pull.number,
            url: pull.html_url,
            branch: request.branch.clone(),
            created: true,
            preview: None,
        })
    }
}

fn decode_content(contents: &ContentsResponse) -> Result<String, RepositoryError> {
    if !contents.encoding.is_empty() && contents.encoding != "base64" {
        return Err(RepositoryError::Decode(format!(
            "unsupported content encoding '{}'",
            contents.encoding
        )));
    }
    // The API wraps base64 content at 60 columns
    let compact: String = contents
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RepositoryError::Decode(e.to_string()))
}

async fn check_status(response: Response) -> Result<Response, RepositoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ApiErrorResponse>().await {
        Ok(body) => body.message,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(RepositoryError::Status {
        status: status.as_u16(),
        message,
    })
}
