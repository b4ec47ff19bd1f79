//! Retrieves the Datadog installation instructions for a Lambda runtime and IaC tool, as text
//! to embed in the instrumentation prompt.

mod html;

use classify_repo::{IacTool, Runtime};
use instrumenter_core::config::unknown_field_warning;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://docs.datadoghq.com";
const USER_AGENT: &str = "instrumenter/0.1";

/// A section of documentation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DocSection {
    pub title: String,
    pub content: String,
    pub url: String,
}

impl DocSection {
    /// The section as it is embedded in a prompt.
    pub fn to_prompt(&self) -> String {
        format!("{}\n\n{}", self.title, self.content)
    }
}

/// Somewhere installation documentation can be looked up.
pub trait DocumentationSource {
    fn lambda_documentation(&self, runtime: Runtime, tool: IacTool)
    -> Result<DocSection, DocsError>;
}

/// Fetches documentation pages over HTTP and converts their main content to Markdown.
pub struct HttpDocs {
    client: reqwest::blocking::Client,
    base_url: Url,
}

impl HttpDocs {
    pub fn new(base_url: &str, timeout: Duration) -> Result<HttpDocs, DocsError> {
        let base_url = Url::parse(base_url).map_err(|e| DocsError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(HttpDocs { client, base_url })
    }

    /// The page documenting `runtime` with `tool`.
    pub fn page_url(&self, runtime: Runtime, tool: IacTool) -> Result<Url, DocsError> {
        let path = format!("/serverless/aws_lambda/installation/{}/", runtime.url_path());
        let mut url = self
            .base_url
            .join(&path)
            .map_err(|e| DocsError::InvalidUrl {
                url: path,
                message: e.to_string(),
            })?;
        url.query_pairs_mut().append_pair("tab", tool.id());
        Ok(url)
    }
}

impl DocumentationSource for HttpDocs {
    fn lambda_documentation(
        &self,
        runtime: Runtime,
        tool: IacTool,
    ) -> Result<DocSection, DocsError> {
        let url = self.page_url(runtime, tool)?;
        info!("Fetching documentation from {url}");
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DocsError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let page = response.text()?;
        let main = html::main_content(&page).ok_or_else(|| DocsError::MissingContent {
            url: url.to_string(),
        })?;
        let content = html::to_markdown(main)?;
        debug!("Documentation page converted to {} bytes of Markdown", content.len());
        Ok(DocSection {
            title: html::title(&content).to_string(),
            content,
            url: url.to_string(),
        })
    }
}

/// Reads documentation from `<dir>/<tool>/<runtime>.md`, for offline use.
pub struct LocalDocs {
    dir: PathBuf,
}

impl LocalDocs {
    pub fn new<P: Into<PathBuf>>(dir: P) -> LocalDocs {
        LocalDocs { dir: dir.into() }
    }

    pub fn page_path(&self, runtime: Runtime, tool: IacTool) -> PathBuf {
        self.dir
            .join(tool.id())
            .join(format!("{}.md", runtime.url_path()))
    }
}

impl DocumentationSource for LocalDocs {
    fn lambda_documentation(
        &self,
        runtime: Runtime,
        tool: IacTool,
    ) -> Result<DocSection, DocsError> {
        let path = self.page_path(runtime, tool);
        let content = fs::read_to_string(&path).map_err(|source| DocsError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(DocSection {
            title: html::title(&content).to_string(),
            content,
            url: file_url(&path),
        })
    }
}

fn file_url(path: &Path) -> String {
    Url::from_file_path(path)
        .map(String::from)
        .unwrap_or_else(|()| path.display().to_string())
}

/// Builds the configured documentation source. A `local_dir` takes precedence over the web.
pub fn from_config(config: &Config) -> Result<Box<dyn DocumentationSource>, DocsError> {
    Ok(match &config.local_dir {
        Some(dir) => Box::new(LocalDocs::new(dir)),
        None => Box::new(HttpDocs::new(
            &config.base_url,
            Duration::from_secs(config.timeout_seconds),
        )?),
    })
}

#[derive(Debug, Error)]
pub enum DocsError {
    #[error("invalid documentation URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("documentation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("documentation request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("no main content found in {url}")]
    MissingContent { url: String },
    #[error("failed to convert documentation to Markdown: {0}")]
    Convert(#[source] io::Error),
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Root of the documentation site.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Directory of pre-fetched pages; when set, the network is not used.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,

    /// HTTP request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(flatten)]
    unknown: HashMap<String, Value>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Config {
    pub fn validate(&self) {
        unknown_field_warning("tools.fetch_docs", &self.unknown);
    }

    /// Returns a mock config for testing.
    pub fn mock() -> Self {
        Self {
            base_url: "http://127.0.0.1:9".into(),
            local_dir: None,
            timeout_seconds: 1,
            unknown: HashMap::new(),
        }
    }
}
