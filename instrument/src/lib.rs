//! Adds Datadog instrumentation to the Lambda functions of a CDK or Terraform repository and
//! opens a pull request with the change. This is normally used through the `instrument` binary,
//! but is exposed as a library crate as well.
//!
//! One run clones the repository, reads it, asks a model what kind of infrastructure code it
//! holds, rewrites the infrastructure script with another model call, and hands the result to
//! [github_pr::PullRequestWorkflow]. Every step depends on the one before it, so the steps run
//! in order on the calling thread.

pub mod cli;

use chrono::Utc;
use classify_repo::{
    ClassifyError, IacTool, LocateError, RepoClassifier, RepoType, Runtime, locate_script,
};
use describe_pr::PrDescriber;
use fetch_docs::{DocSection, DocsError, DocumentationSource};
use github_pr::{
    GithubApi, GithubClient, GithubError, InvalidRepository, PullRequestError, PullRequestInfo,
    PullRequestWorkflow, RepoRef,
};
use instrument_script::{InstrumentError, InstrumentRequest, ScriptInstrumenter};
use instrumenter_core::config::{Config, ConfigError};
use instrumenter_core::llm::{ApiKey, LlmError};
use instrumenter_core::prompts::{PromptTemplates, TemplateError};
use instrumenter_core::session::{MemorySessionStore, SessionStore};
use instrumenter_core::{RepoTree, TreeReadError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable consulted when neither the session nor the config has a GitHub token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Opens a connection to GitHub authenticated with a particular token.
pub trait Connect {
    fn connect(&self, token: Option<ApiKey>) -> Result<Box<dyn GithubApi>, GithubError>;
}

/// Connects to the GitHub REST API.
pub struct RestConnector {
    pub api_url: String,
    pub timeout: Duration,
}

impl Connect for RestConnector {
    fn connect(&self, token: Option<ApiKey>) -> Result<Box<dyn GithubApi>, GithubError> {
        Ok(Box::new(GithubClient::new(&self.api_url, token, self.timeout)?))
    }
}

/// One request to instrument a repository.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowRequest<'a> {
    /// `owner/repo` or a GitHub URL.
    pub repository: &'a str,
    /// Free-text instructions passed through to the model.
    pub additional_context: &'a str,
    /// Session whose stored GitHub token should be used, if any.
    pub session: Option<&'a str>,
    /// Branch name to push instead of a generated one.
    pub branch: Option<&'a str>,
}

/// What the classifier decided and what the instrumentation step did with it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Analysis {
    pub classification: RepoType,
    /// Repository-relative path of the file that was given to the model.
    pub script_file: String,
    pub next_steps: Vec<String>,
    pub doc_urls: Vec<String>,
}

/// The outcome of a successful run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkflowResult {
    pub repository: String,
    pub received_at: String,
    pub completed_at: String,
    /// Location of the clone, present only when it was kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_path: Option<PathBuf>,
    pub analysis: Analysis,
    pub pull_request: PullRequestInfo,
}

/// Every component one run needs. Fields are public so callers (and tests) can assemble an
/// instrumenter from parts; [Instrumenter::from_config] builds the usual one.
pub struct Instrumenter {
    pub classifier: RepoClassifier,
    pub docs: Box<dyn DocumentationSource>,
    pub instrumenter: ScriptInstrumenter,
    pub describer: PrDescriber,
    pub connector: Box<dyn Connect>,
    pub github: github_pr::Config,
    pub sessions: Arc<dyn SessionStore>,
    /// Directory under which each run creates its clone directory.
    pub workspace: PathBuf,
    /// Glob selecting the files that are read from the clone.
    pub glob: String,
    pub keep_clone: bool,
}

impl Instrumenter {
    pub fn from_config(config: &Config) -> Result<Instrumenter, WorkflowError> {
        let templates = PromptTemplates::load(config.prompts_dir.as_deref())?;

        let classify: classify_repo::Config = config.tool("classify_repo")?;
        let docs: fetch_docs::Config = config.tool("fetch_docs")?;
        let instrument: instrument_script::Config = config.tool("instrument_script")?;
        let describe: describe_pr::Config = config.tool("describe_pr")?;
        let github: github_pr::Config = config.tool("github_pr")?;
        classify.validate();
        docs.validate();
        instrument.validate();
        describe.validate();
        github.validate();

        Ok(Instrumenter {
            classifier: RepoClassifier::from_config(&classify, templates.clone())?,
            docs: fetch_docs::from_config(&docs)?,
            instrumenter: ScriptInstrumenter::from_config(&instrument, templates.clone())?,
            describer: PrDescriber::from_config(&describe, templates)?,
            connector: Box::new(RestConnector {
                api_url: github.api_url.clone(),
                timeout: Duration::from_secs(github.timeout_seconds),
            }),
            github,
            sessions: Arc::new(MemorySessionStore::new()),
            workspace: config.workspace.clone(),
            glob: classify.glob,
            keep_clone: config.keep_clone,
        })
    }

    /// Runs the whole workflow for one repository. The clone is removed when this returns
    /// unless it succeeded with `keep_clone` set.
    pub fn run(&self, request: &WorkflowRequest) -> Result<WorkflowResult, WorkflowError> {
        let received_at = Utc::now().to_rfc3339();
        let repo = RepoRef::parse(request.repository)?;
        info!("Instrumenting {repo}");

        let github = self.connector.connect(self.token(request.session))?;
        let pull_requests = PullRequestWorkflow::new(github, &self.github);
        let checkout = pull_requests.clone_repository(&repo, &self.workspace)?;
        info!("Cloned repository {repo} to {}", checkout.path().display());

        let tree = RepoTree::read_matching(checkout.path(), &self.glob)?;
        let classification = self.classifier.classify(&tree)?;
        let Some(tool) = classification.kind.iac_tool() else {
            return Err(WorkflowError::Unsupported {
                repository: repo.full_name(),
            });
        };
        let script = locate_script(&tree, &classification)?;
        info!("Instrumenting {tool} script {}", script.source());

        let docs = self.documentation(classification.runtime, tool);
        let documentation = docs.as_ref().map(DocSection::to_prompt).unwrap_or_default();
        let changes = self.instrumenter.instrument(&InstrumentRequest {
            script,
            tool,
            documentation: &documentation,
            runtime: classification.runtime,
            additional_context: request.additional_context,
            doc_url: docs.as_ref().map(|d| d.url.as_str()),
        })?;
        info!("Successfully generated instrumentation");

        let pull_request =
            pull_requests.open_pull_request(&checkout, &changes, &self.describer, request.branch)?;
        info!("Pull request result {pull_request:?}");

        let cloned_path = match self.keep_clone {
            true => Some(checkout.keep()),
            false => None,
        };
        Ok(WorkflowResult {
            repository: repo.full_name(),
            received_at,
            completed_at: Utc::now().to_rfc3339(),
            cloned_path,
            analysis: Analysis {
                classification,
                script_file: script.source().to_string(),
                next_steps: changes.next_steps,
                doc_urls: changes.doc_urls,
            },
            pull_request,
        })
    }

    /// Converts a failed run into the payload reported to the caller.
    pub fn error_payload(&self, repository: &str, error: &WorkflowError) -> ErrorPayload {
        error.to_payload(repository, &self.github.auth_url)
    }

    /// The session's token, then the configured token, then `GITHUB_TOKEN`.
    fn token(&self, session: Option<&str>) -> Option<ApiKey> {
        let non_empty = |key: &ApiKey| key.non_empty().is_some();
        if let Some(key) = session
            .and_then(|s| self.sessions.get(s))
            .map(ApiKey)
            .filter(non_empty)
        {
            debug!("Using the session's GitHub token");
            return Some(key);
        }
        if let Some(key) = self.github.token.clone().filter(non_empty) {
            debug!("Using the configured GitHub token");
            return Some(key);
        }
        let key = std::env::var(TOKEN_ENV).ok().map(ApiKey).filter(non_empty);
        if key.is_none() {
            debug!("No GitHub token available; only public repositories can be read");
        }
        key
    }

    /// Installation documentation for `runtime`. A failed lookup is not fatal: the model is
    /// asked to work without documentation instead.
    fn documentation(&self, runtime: Option<Runtime>, tool: IacTool) -> Option<DocSection> {
        let Some(runtime) = runtime else {
            info!("No runtime detected; skipping the documentation lookup");
            return None;
        };
        match self.docs.lambda_documentation(runtime, tool) {
            Ok(section) => {
                debug!("Using documentation {:?} from {}", section.title, section.url);
                Some(section)
            }
            Err(e) => {
                warn!("Could not fetch {runtime} {tool} documentation: {e}");
                None
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Docs(#[from] DocsError),
    #[error(transparent)]
    InvalidRepository(#[from] InvalidRepository),
    #[error(transparent)]
    Github(#[from] GithubError),
    #[error(transparent)]
    PullRequest(#[from] PullRequestError),
    #[error(transparent)]
    Read(#[from] TreeReadError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("repository type not supported: {repository} is neither a CDK nor a Terraform project")]
    Unsupported { repository: String },
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

/// The failure report for a run, shaped like an HTTP error response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub status: u16,
    pub error: String,
    pub detail: String,
    pub repository: String,
    /// Where to authorize access, for failures that a new token could fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    /// The model output that could not be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl WorkflowError {
    /// Builds the payload for a run on `repository`. Access failures carry a link to
    /// `auth_base` that requests a token for the repository.
    pub fn to_payload(&self, repository: &str, auth_base: &str) -> ErrorPayload {
        let (status, error, needs_auth) = match self {
            WorkflowError::PullRequest(PullRequestError::NotFound { .. })
            | WorkflowError::Github(GithubError::NotFound { .. }) => {
                (401, "repository_not_found", true)
            }
            WorkflowError::PullRequest(PullRequestError::Forbidden { .. })
            | WorkflowError::Github(GithubError::Forbidden { .. }) => (403, "access_denied", true),
            WorkflowError::PullRequest(PullRequestError::AuthRequired { .. })
            | WorkflowError::Github(GithubError::AuthRequired) => (401, "auth_required", true),
            WorkflowError::InvalidRepository(_) => (400, "invalid_repository", false),
            WorkflowError::PullRequest(PullRequestError::NoChanges { .. }) => {
                (500, "no_changes", false)
            }
            WorkflowError::Unsupported { .. } => (500, "unsupported_repository", false),
            _ => (500, "internal_error", false),
        };
        let detail = match status {
            403 => format!("{self}. The token needs write access (repo scope)."),
            _ => self.to_string(),
        };
        ErrorPayload {
            status,
            error: error.into(),
            detail,
            repository: repository.into(),
            auth_url: needs_auth.then(|| auth_url(auth_base, repository)),
            raw_response: self.raw_response().map(String::from),
        }
    }

    /// The model output behind a classification or instrumentation failure.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            WorkflowError::Classify(e) => e.raw_response(),
            WorkflowError::Instrument(e) => e.raw_response(),
            _ => None,
        }
    }
}

fn auth_url(auth_base: &str, repository: &str) -> String {
    let repository: String = url::form_urlencoded::byte_serialize(repository.as_bytes()).collect();
    let separator = match auth_base.contains('?') {
        true => '&',
        false => '?',
    };
    format!("{auth_base}{separator}repository={repository}&scope=repo")
}
