//! Remote hosting API access.
//!
//! Only the handful of GitHub REST endpoints a command run needs: repository
//! lookup (existence + default branch), fork creation and branch lookup.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

const USER_AGENT_VALUE: &str = "batch-node";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub default_branch: String,
}

#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// `None` when the hosting API reports the repository as not found.
    async fn repo_info(&self, owner: &str, repo: &str) -> Result<Option<RemoteRepo>>;

    async fn create_fork(&self, owner: &str, repo: &str, organization: &str) -> Result<()>;

    async fn branch_exists(&self, owner: &str, repo: &str, branch: &str) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorResponse {
    message: String,
}

/// GitHub REST implementation of [`RemoteHost`].
pub struct GitHubHost {
    client: Client,
    token: Option<String>,
    api_base: String,
}

impl std::fmt::Debug for GitHubHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubHost")
            .field("has_token", &self.token.is_some())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GitHubHost {
    pub fn new(token: Option<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| AppError::RemoteApi("Invalid token format".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        Ok(headers)
    }

    fn repo_url(&self, owner: &str, repo: &str, path: &str) -> String {
        if path.is_empty() {
            format!("{}/repos/{}/{}", self.api_base, owner, repo)
        } else {
            format!("{}/repos/{}/{}/{}", self.api_base, owner, repo, path)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| AppError::RemoteApi(format!("network error: {}", e)))
    }

    async fn error_from(response: reqwest::Response) -> AppError {
        let status = response.status();
        let message = match response.json::<GitHubErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => "Unknown error".to_string(),
        };
        AppError::RemoteApi(format!("GitHub API error: {} - {}", status.as_u16(), message))
    }
}

#[async_trait]
impl RemoteHost for GitHubHost {
    async fn repo_info(&self, owner: &str, repo: &str) -> Result<Option<RemoteRepo>> {
        let response = self
            .send(self.client.get(self.repo_url(owner, repo, "")))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: RepoResponse = response.json().await.map_err(|e| {
                    AppError::RemoteApi(format!("Failed to parse response: {}", e))
                })?;
                Ok(Some(RemoteRepo {
                    default_branch: body.default_branch,
                }))
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn create_fork(&self, owner: &str, repo: &str, organization: &str) -> Result<()> {
        let body = serde_json::json!({ "organization": organization });
        let response = self
            .send(self.client.post(self.repo_url(owner, repo, "forks")).json(&body))
            .await?;

        // 202 Accepted: the fork is created asynchronously on GitHub's side
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from(response).await)
    }

    async fn branch_exists(&self, owner: &str, repo: &str, branch: &str) -> Result<bool> {
        let response = self
            .send(
                self.client
                    .get(self.repo_url(owner, repo, &format!("branches/{}", branch))),
            )
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::error_from(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_under_api_base() {
        let host = GitHubHost::new(None, "https://github.example.com/api/v3/");
        assert_eq!(
            host.repo_url("octo", "hello", ""),
            "https://github.example.com/api/v3/repos/octo/hello"
        );
        assert_eq!(
            host.repo_url("octo", "hello", "forks"),
            "https://github.example.com/api/v3/repos/octo/hello/forks"
        );
    }

    #[test]
    fn debug_hides_token() {
        let host = GitHubHost::new(Some("ghp_secret".to_string()), "https://api.github.com");
        let rendered = format!("{:?}", host);
        assert!(!rendered.contains("ghp_secret"));
    }
}
