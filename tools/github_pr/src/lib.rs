//! Turns an instrumentation result into a GitHub pull request: clone, branch, write, commit,
//! diff, describe, push, open.
//!
//! Each clone lives in its own temporary directory owned by a [Checkout]. Dropping the
//! checkout removes the directory, so a failure at any step after cloning leaves nothing behind.

mod api;
mod git;
mod repo_ref;
#[cfg(all(test, not(miri)))]
mod tests;

pub use api::{
    DEFAULT_API_URL, GithubApi, GithubClient, GithubError, NewPullRequest, PullRequest,
    RepositoryInfo,
};
pub use git::{Author, Git, GitError};
pub use repo_ref::{InvalidRepository, RepoRef};

use describe_pr::{PRDescription, PrDescriber};
use instrument_script::InstrumentationResult;
use instrumenter_core::config::unknown_field_warning;
use instrumenter_core::llm::ApiKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// What a successful workflow reports about the pull request it opened.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PullRequestInfo {
    pub pr_url: String,
    pub pr_number: u64,
    pub title: String,
    pub branch: String,
    pub status: String,
    pub files_changed: Vec<String>,
    /// The pull request title, which is also what reviewers see as the change summary.
    pub commit_message: String,
    pub instrumentation_type: String,
}

/// A cloned repository in a temporary directory that is deleted when this is dropped.
pub struct Checkout {
    dir: TempDir,
    git: Git,
    repo: RepoRef,
    default_branch: Option<String>,
}

impl Checkout {
    pub fn path(&self) -> &Path {
        self.git.path()
    }

    pub fn repository(&self) -> &RepoRef {
        &self.repo
    }

    /// The default branch GitHub reported for the repository.
    pub fn default_branch(&self) -> Option<&str> {
        self.default_branch.as_deref()
    }

    /// Stops the clone from being deleted, returning its location.
    pub fn keep(self) -> PathBuf {
        let path = self.path().to_path_buf();
        let _ = self.dir.keep();
        path
    }
}

/// Runs the git and GitHub side of the workflow.
pub struct PullRequestWorkflow {
    api: Box<dyn GithubApi>,
    settings: Settings,
}

struct Settings {
    base_branch: Option<String>,
    branch_prefix: String,
    commit_message: String,
    author: Author,
    stage_all: bool,
}

impl PullRequestWorkflow {
    pub fn new(api: Box<dyn GithubApi>, config: &Config) -> PullRequestWorkflow {
        PullRequestWorkflow {
            api,
            settings: Settings {
                base_branch: config.base_branch.clone().filter(|b| !b.trim().is_empty()),
                branch_prefix: config.branch_prefix.clone(),
                commit_message: config.commit_message.clone(),
                author: Author {
                    name: config.author_name.clone(),
                    email: config.author_email.clone(),
                },
                stage_all: config.stage_all,
            },
        }
    }

    /// Looks `repo` up on GitHub and clones it into a new temporary directory under `workspace`
    /// (the system temporary directory if `workspace` is empty).
    pub fn clone_repository(
        &self,
        repo: &RepoRef,
        workspace: &Path,
    ) -> Result<Checkout, PullRequestError> {
        let info = self
            .api
            .repository(repo)
            .map_err(|e| PullRequestError::from_api(repo, e))?;
        let token = self.api.token();
        let clone_url = authenticated_url(&info.clone_url, token);
        let dir = make_clone_dir(workspace).map_err(PullRequestError::Workspace)?;
        let target = dir.path().join(&repo.name);
        let secrets = token.map(String::from).into_iter().collect();
        info!("Cloning {repo} into {}", target.display());
        // A private repository looks the same as a missing one to an unauthenticated clone.
        let git = Git::clone(&clone_url, &target, secrets).map_err(|e| match e {
            e if e.is_access_denied() => PullRequestError::Forbidden {
                repository: repo.full_name(),
                message: e.to_string(),
            },
            e if e.is_not_found() || e.is_auth_required() => PullRequestError::NotFound {
                repository: repo.full_name(),
            },
            e => PullRequestError::Git(e),
        })?;
        Ok(Checkout {
            dir,
            git,
            repo: repo.clone(),
            default_branch: info.default_branch,
        })
    }

    /// Commits `changes` to a new branch of `checkout`, pushes it, and opens a pull request
    /// against the base branch. `branch` overrides the generated branch name.
    pub fn open_pull_request(
        &self,
        checkout: &Checkout,
        changes: &InstrumentationResult,
        describer: &PrDescriber,
        branch: Option<&str>,
    ) -> Result<PullRequestInfo, PullRequestError> {
        let git = &checkout.git;
        let repo = &checkout.repo;
        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => format!(
                "{}-{}",
                self.settings.branch_prefix,
                chrono::Utc::now().timestamp()
            ),
        };
        let base = self
            .settings
            .base_branch
            .as_deref()
            .or(checkout.default_branch())
            .unwrap_or("main")
            .to_string();

        debug!("Creating branch {branch} and committing changes");
        git.checkout_new_branch(&branch)?;
        let written = git.write_files(&changes.file_changes)?;
        git.stage(match self.settings.stage_all {
            true => None,
            false => Some(written.as_slice()),
        })?;
        if git.staged_files()?.is_empty() {
            return Err(PullRequestError::NoChanges {
                repository: repo.full_name(),
                files: written,
            });
        }
        git.commit(&self.settings.commit_message, &self.settings.author)?;

        debug!("Computing diff against {base}");
        let diff = git.diff(&base)?;
        let description = describer.describe(&diff, &written);

        debug!("Pushing {branch}");
        git.push(&branch).map_err(|e| match e {
            e if e.is_access_denied() => PullRequestError::Forbidden {
                repository: repo.full_name(),
                message: e.to_string(),
            },
            e if e.is_auth_required() => PullRequestError::AuthRequired {
                repository: repo.full_name(),
            },
            e if e.is_not_found() => PullRequestError::NotFound {
                repository: repo.full_name(),
            },
            e => PullRequestError::Git(e),
        })?;

        let pull_request = self
            .api
            .create_pull_request(repo, &new_pull_request(&description, &branch, &base))
            .map_err(|e| PullRequestError::from_api(repo, e))?;
        info!("Created pull request {}", pull_request.html_url);

        Ok(PullRequestInfo {
            pr_url: pull_request.html_url,
            pr_number: pull_request.number,
            title: description.title.clone(),
            branch,
            status: "created".into(),
            files_changed: written,
            commit_message: description.title,
            instrumentation_type: changes.instrumentation_type.clone(),
        })
    }
}

fn new_pull_request(description: &PRDescription, branch: &str, base: &str) -> NewPullRequest {
    NewPullRequest {
        title: description.title.clone(),
        body: description.body(),
        head: branch.into(),
        base: base.into(),
    }
}

/// `clone_url` with `token` embedded as HTTPS credentials. Other URLs are returned unchanged.
fn authenticated_url(clone_url: &str, token: Option<&str>) -> String {
    let Some(token) = token else {
        return clone_url.into();
    };
    match Url::parse(clone_url) {
        Ok(mut url) if url.scheme() == "https" => {
            if url.set_username("x-access-token").is_err() || url.set_password(Some(token)).is_err()
            {
                warn!("Could not add credentials to clone URL");
                return clone_url.into();
            }
            url.into()
        }
        _ => clone_url.into(),
    }
}

fn make_clone_dir(workspace: &Path) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("instrument-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o700));
    }
    match workspace.as_os_str().is_empty() {
        true => builder.tempdir(),
        false => {
            std::fs::create_dir_all(workspace)?;
            builder.tempdir_in(workspace)
        }
    }
}

#[derive(Debug, Error)]
pub enum PullRequestError {
    #[error("repository {repository} was not found; it may be private and need authorization")]
    NotFound { repository: String },
    #[error("access to repository {repository} was denied: {message}")]
    Forbidden { repository: String, message: String },
    #[error("a GitHub token is required to open pull requests on {repository}")]
    AuthRequired { repository: String },
    #[error("the instrumented files {files:?} match what {repository} already has; there is nothing to commit")]
    NoChanges {
        repository: String,
        files: Vec<String>,
    },
    #[error("pull request generation failed: {0}")]
    Github(#[source] GithubError),
    #[error("git operation failed: {0}")]
    Git(#[from] GitError),
    #[error("failed to create a working directory: {0}")]
    Workspace(#[source] io::Error),
}

impl PullRequestError {
    fn from_api(repo: &RepoRef, error: GithubError) -> PullRequestError {
        let repository = repo.full_name();
        match error {
            GithubError::NotFound { .. } => PullRequestError::NotFound { repository },
            GithubError::Forbidden { message, .. } => {
                PullRequestError::Forbidden { repository, message }
            }
            GithubError::AuthRequired => PullRequestError::AuthRequired { repository },
            e => PullRequestError::Github(e),
        }
    }
}

pub const DEFAULT_AUTH_URL: &str = "http://localhost:8000/auth/github";

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the GitHub REST API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Token used when no session token is available. `GITHUB_TOKEN` is used when both are
    /// absent.
    #[serde(default)]
    pub token: Option<ApiKey>,

    /// Where users are sent to authorize access to a private repository.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Branch pull requests target. Defaults to the repository's default branch.
    #[serde(default)]
    pub base_branch: Option<String>,

    /// Generated branch names are `<branch_prefix>-<unix timestamp>`.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    #[serde(default = "default_commit_message")]
    pub commit_message: String,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Stage every change in the clone rather than only the files that were written.
    #[serde(default)]
    pub stage_all: bool,

    /// GitHub API request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(flatten)]
    unknown: HashMap<String, Value>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.into()
}

fn default_branch_prefix() -> String {
    "feature/dd-instrument".into()
}

fn default_commit_message() -> String {
    "Instrumented with Datadog".into()
}

fn default_author_name() -> String {
    "DD Instrumenter".into()
}

fn default_author_email() -> String {
    "dd-instrumenter@users.noreply.github.com".into()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Config {
    pub fn validate(&self) {
        unknown_field_warning("tools.github_pr", &self.unknown);
    }

    /// Returns a mock config for testing.
    pub fn mock() -> Self {
        Self {
            api_url: "http://127.0.0.1:9".into(),
            token: None,
            auth_url: DEFAULT_AUTH_URL.into(),
            base_branch: None,
            branch_prefix: default_branch_prefix(),
            commit_message: default_commit_message(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            stage_all: false,
            timeout_seconds: 1,
            unknown: HashMap::new(),
        }
    }
}
