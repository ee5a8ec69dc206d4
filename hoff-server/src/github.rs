//! GitHub REST driver: comments and collaborator permission checks.
//!
//! Uses the blocking `reqwest` client; the caller is the logic worker's
//! thread, never the async runtime.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use hoff_core::{PullRequestId, Username};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = "hoff-merge-train";

pub struct GithubClient {
    client: Client,
    base_url: String,
    token: String,
    owner: String,
    repository: String,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: String,
}

impl GithubClient {
    pub fn new(owner: &str, repository: &str, token: String) -> Result<Self> {
        Self::with_base_url(owner, repository, token, GITHUB_API.to_string())
    }

    /// Client against a non-default API root, for tests and GitHub
    /// Enterprise installs.
    pub fn with_base_url(
        owner: &str,
        repository: &str,
        token: String,
        base_url: String,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build the GitHub HTTP client")?;
        Ok(GithubClient {
            client,
            base_url,
            token,
            owner: owner.to_string(),
            repository: repository.to_string(),
        })
    }

    /// Posts a comment on the pull request.
    pub fn leave_comment(&self, id: PullRequestId, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_url, self.owner, self.repository, id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&CreateCommentRequest { body })
            .send()
            .with_context(|| format!("failed to post a comment on #{id}"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "posting a comment on #{id} returned {}",
                response.status()
            ));
        }
        info!("left a comment on #{id}");
        Ok(())
    }

    /// Whether the user has push access to the repository.
    pub fn has_push_access(&self, username: &Username) -> Result<bool> {
        let url = format!(
            "{}/repos/{}/{}/collaborators/{}/permission",
            self.base_url, self.owner, self.repository, username
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .with_context(|| format!("failed to query permissions of {username}"))?;
        // Not a collaborator at all.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "querying permissions of {username} returned {}",
                response.status()
            ));
        }
        let parsed: PermissionResponse = response
            .json()
            .with_context(|| format!("failed to decode the permission of {username}"))?;
        Ok(permission_grants_push(&parsed.permission))
    }
}

/// `admin` and `write` can push; `read` (and anything unknown) cannot.
fn permission_grants_push(permission: &str) -> bool {
    matches!(permission, "admin" | "write")
}
