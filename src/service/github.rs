//! GitHub content push
//!
//! Creates or updates a single file through the repository contents API
//! using the access token stored with a GitHub-originated session.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use crate::auth::SessionIdentity;
use crate::error::AppError;

const ACCEPT: &str = "application/vnd.github+json";

/// File write requested by the user
///
/// Accepts the original camelCase field names as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct PushRequest {
    /// `owner/name`
    #[serde(alias = "repoName")]
    pub repository: String,
    /// Target branch; empty means the repository default
    #[serde(default)]
    pub branch: String,
    #[serde(alias = "filePath")]
    pub path: String,
    #[serde(alias = "commitMessage")]
    pub message: String,
    #[serde(alias = "fileContent")]
    pub content: String,
}

/// Result of a successful push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    /// True when the file did not exist before
    pub created: bool,
    pub commit_sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct WriteFile<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    commit: Option<CommitRef>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Split `owner/name` into its parts
///
/// # Errors
/// `InvalidRepository` unless there are exactly two non-empty parts
pub fn parse_repository(repository: &str) -> Result<(&str, &str), AppError> {
    let mut parts = repository.trim().split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner, name))
        }
        _ => Err(AppError::InvalidRepository(repository.to_string())),
    }
}

/// GitHub REST client
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Create or update a file on behalf of the session user
    ///
    /// # Steps
    /// 1. Require the session's GitHub token
    /// 2. Validate `owner/name`
    /// 3. Read the current blob sha, treating any failure as a new file
    /// 4. PUT the base64 content, attaching the sha when one exists
    pub async fn push_file(
        &self,
        identity: &SessionIdentity,
        request: &PushRequest,
    ) -> Result<PushOutcome, AppError> {
        let token = identity
            .provider_access_token
            .as_deref()
            .ok_or(AppError::MissingCredential)?;
        let (owner, name) = parse_repository(&request.repository)?;

        let path = request.path.trim().trim_matches('/');
        if path.is_empty() {
            return Err(AppError::Validation("file path must not be empty".to_string()));
        }
        if request.message.trim().is_empty() {
            return Err(AppError::Validation(
                "commit message must not be empty".to_string(),
            ));
        }

        let branch = Some(request.branch.trim()).filter(|branch| !branch.is_empty());
        let url = self.contents_url(owner, name, path);
        let current_sha = self.current_sha(token, &url, branch).await;

        let body = WriteFile {
            message: &request.message,
            content: general_purpose::STANDARD.encode(request.content.as_bytes()),
            branch,
            sha: current_sha,
        };

        let response = self
            .http
            .put(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Error connecting to GitHub");
                AppError::RemoteUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiError>()
                .await
                .ok()
                .and_then(|error| error.message)
                .unwrap_or_else(|| "Unknown error".to_string());
            tracing::warn!(%status, %message, repository = %request.repository, "GitHub rejected push");
            return Err(AppError::RemoteRejected {
                status: status.as_u16(),
                message,
            });
        }

        let created = status == reqwest::StatusCode::CREATED;
        let commit_sha = response
            .json::<WriteResponse>()
            .await
            .ok()
            .and_then(|written| written.commit)
            .and_then(|commit| commit.sha);

        tracing::info!(
            repository = %request.repository,
            path,
            created,
            "Pushed file to GitHub"
        );

        Ok(PushOutcome {
            created,
            commit_sha,
        })
    }

    fn contents_url(&self, owner: &str, name: &str, path: &str) -> String {
        let path = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base,
            urlencoding::encode(owner),
            urlencoding::encode(name),
            path
        )
    }

    /// Revision marker of the existing file, if any
    async fn current_sha(&self, token: &str, url: &str, branch: Option<&str>) -> Option<String> {
        let mut request = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .timeout(Duration::from_secs(10));
        if let Some(branch) = branch {
            request = request.query(&[("ref", branch)]);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "Could not read current file; assuming it is new");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "File does not exist yet");
            return None;
        }

        // Directories come back as arrays and have no sha.
        response
            .json::<ContentEntry>()
            .await
            .ok()
            .and_then(|entry| entry.sha)
    }
}
