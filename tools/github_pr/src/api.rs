//! The parts of the GitHub REST API the instrumenter uses.

use crate::RepoRef;
use instrumenter_core::llm::ApiKey;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "instrumenter/0.1";

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RepositoryInfo {
    pub full_name: String,
    pub clone_url: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

/// GitHub operations used by the pull request workflow.
pub trait GithubApi {
    /// The token requests are authenticated with, if any.
    fn token(&self) -> Option<&str>;

    fn repository(&self, repo: &RepoRef) -> Result<RepositoryInfo, GithubError>;

    fn create_pull_request(
        &self,
        repo: &RepoRef,
        pull_request: &NewPullRequest,
    ) -> Result<PullRequest, GithubError>;
}

/// Blocking GitHub REST client.
pub struct GithubClient {
    client: Client,
    api_url: Url,
    token: Option<ApiKey>,
}

impl GithubClient {
    pub fn new(
        api_url: &str,
        token: Option<ApiKey>,
        timeout: Duration,
    ) -> Result<GithubClient, GithubError> {
        // A trailing slash makes relative joins append instead of replacing the last segment.
        let api_url = Url::parse(&format!("{}/", api_url.trim_end_matches('/')))
            .map_err(|e| GithubError::InvalidResponse(format!("invalid API URL {api_url:?}: {e}")))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        let token = token.filter(|t| t.non_empty().is_some());
        Ok(GithubClient {
            client,
            api_url,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, GithubError> {
        self.api_url
            .join(path)
            .map_err(|e| GithubError::InvalidResponse(format!("invalid API path {path:?}: {e}")))
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder, url: &Url) -> Result<T, GithubError> {
        let mut request = request
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;
        let status = response.status();
        debug!("GitHub API {url} returned {status}");
        if !status.is_success() {
            return Err(error_for_status(url, status, response));
        }
        let body = response.text()?;
        serde_json::from_str(&body)
            .map_err(|e| GithubError::InvalidResponse(format!("unexpected response from {url}: {e}")))
    }
}

impl GithubApi for GithubClient {
    fn token(&self) -> Option<&str> {
        self.token.as_ref().and_then(ApiKey::non_empty)
    }

    fn repository(&self, repo: &RepoRef) -> Result<RepositoryInfo, GithubError> {
        let url = self.url(&format!("repos/{}/{}", repo.owner, repo.name))?;
        self.send(self.client.get(url.clone()), &url)
    }

    fn create_pull_request(
        &self,
        repo: &RepoRef,
        pull_request: &NewPullRequest,
    ) -> Result<PullRequest, GithubError> {
        if self.token().is_none() {
            return Err(GithubError::AuthRequired);
        }
        let url = self.url(&format!("repos/{}/{}/pulls", repo.owner, repo.name))?;
        self.send(self.client.post(url.clone()).json(pull_request), &url)
    }
}

fn error_for_status(url: &Url, status: StatusCode, response: Response) -> GithubError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    let message = response
        .text()
        .ok()
        .and_then(|body| serde_json::from_str::<ErrorBody>(&body).ok())
        .map(|body| body.message)
        .unwrap_or_else(|| status.to_string());
    let url = url.to_string();
    match status {
        StatusCode::NOT_FOUND => GithubError::NotFound { url },
        StatusCode::FORBIDDEN => GithubError::Forbidden { url, message },
        StatusCode::UNAUTHORIZED => GithubError::AuthRequired,
        _ => GithubError::Status {
            url,
            status: status.as_u16(),
            message,
        },
    }
}

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("{url} was not found")]
    NotFound { url: String },
    #[error("access to {url} was forbidden: {message}")]
    Forbidden { url: String, message: String },
    #[error("GitHub authentication is required")]
    AuthRequired,
    #[error("{url} returned HTTP {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    InvalidResponse(String),
}
