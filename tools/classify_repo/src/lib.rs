//! Decides whether a repository is a CDK project, a Terraform project, or neither, by showing
//! a model a compact listing of the repository.

mod kind;
mod locate;
#[cfg(test)]
mod tests;

pub use kind::{IacTool, RepoKind, Runtime, UnknownRuntime};
pub use locate::{LocateError, locate_script};

use instrumenter_core::config::unknown_field_warning;
use instrumenter_core::llm::{Completion, InstrumenterLLM, LLMConfig, LlmError, complete_json};
use instrumenter_core::prompts::{CLASSIFY_REPO, PromptTemplates, TemplateError};
use instrumenter_core::{Document, RepoTree};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info};

/// Structured output JSON schema, for backends that support it.
const STRUCTURED_OUTPUT_SCHEMA: &str = include_str!("structured_schema.json");

/// Files whose content contains one of these (case-insensitively) get an excerpt in the listing.
const EXCERPT_KEYWORDS: [&str; 4] = ["cdk", "terraform", "resource", "stack"];

/// The classifier's verdict on a repository.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepoType {
    #[serde(rename = "repo_type")]
    pub kind: RepoKind,
    #[serde(deserialize_with = "confidence")]
    pub confidence: f64,
    pub evidence: Vec<String>,
    /// Path of the infrastructure script relative to the repository root. May be empty.
    #[serde(default)]
    pub script_file: String,
    /// `None` when the model could not tell.
    #[serde(default, with = "kind::runtime_or_empty")]
    pub runtime: Option<Runtime>,
}

fn confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = f64::deserialize(d)?;
    match (0.0..=1.0).contains(&value) {
        true => Ok(value),
        false => Err(D::Error::custom(format!(
            "confidence {value} is outside [0, 1]"
        ))),
    }
}

pub struct RepoClassifier {
    llm: Box<dyn Completion>,
    templates: PromptTemplates,
    excerpt_chars: usize,
}

impl RepoClassifier {
    pub fn new(llm: Box<dyn Completion>, templates: PromptTemplates) -> RepoClassifier {
        RepoClassifier {
            llm,
            templates,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    /// Builds a classifier that talks to the model described by `config`.
    pub fn from_config(
        config: &Config,
        templates: PromptTemplates,
    ) -> Result<RepoClassifier, ClassifyError> {
        debug!("LLM Configuration {:?}", config.llm);
        let schema = config.structured_output.then_some(STRUCTURED_OUTPUT_SCHEMA);
        let llm = InstrumenterLLM::build(&config.llm, schema)?;
        Ok(Self::new(Box::new(llm), templates).excerpt_chars(config.excerpt_chars))
    }

    /// Sets how many characters of each infrastructure-looking file are shown to the model.
    pub fn excerpt_chars(mut self, excerpt_chars: usize) -> RepoClassifier {
        self.excerpt_chars = excerpt_chars;
        self
    }

    /// Classifies `tree` with a single model call.
    pub fn classify(&self, tree: &RepoTree) -> Result<RepoType, ClassifyError> {
        let listing = render_listing(tree, self.excerpt_chars);
        let prompt = self
            .templates
            .render(CLASSIFY_REPO, &[("repo_contents", &listing)])?;
        let verdict: RepoType = complete_json(self.llm.as_ref(), &prompt)?;
        info!(
            "Repository classified as {} (confidence {:.2}, script {:?}, runtime {})",
            verdict.kind,
            verdict.confidence,
            verdict.script_file,
            verdict.runtime.map(Runtime::as_str).unwrap_or("not detected"),
        );
        Ok(verdict)
    }
}

/// Renders the repository as the model sees it: one entry per file, with a short excerpt for
/// files that mention infrastructure keywords.
pub fn render_listing(tree: &RepoTree, excerpt_chars: usize) -> String {
    let mut listing = String::new();
    for document in tree.documents() {
        let _ = writeln!(listing, "File: {}", document.source());
        if excerpt_chars > 0 && mentions_infrastructure(document) {
            let excerpt: String = document.content().chars().take(excerpt_chars).collect();
            let _ = writeln!(listing, "{}", excerpt.trim_end());
        }
        listing.push_str("---\n");
    }
    listing
}

fn mentions_infrastructure(document: &Document) -> bool {
    let content = document.content().to_ascii_lowercase();
    EXCERPT_KEYWORDS.iter().any(|k| content.contains(k))
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("repository classification failed: {0}")]
    Llm(#[from] LlmError),
}

impl ClassifyError {
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            ClassifyError::Llm(e) => e.raw_response(),
            ClassifyError::Template(_) => None,
        }
    }
}

const DEFAULT_EXCERPT_CHARS: usize = 400;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// LLM configuration.
    #[serde(flatten)]
    pub llm: LLMConfig,

    /// Maximum number of characters of each file excerpt in the repository listing.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Only files whose repository-relative path matches this glob are read.
    #[serde(default = "default_glob")]
    pub glob: String,

    /// Ask the backend to constrain its output to the verdict's JSON schema.
    #[serde(default)]
    pub structured_output: bool,

    #[serde(flatten)]
    unknown: HashMap<String, Value>,
}

fn default_excerpt_chars() -> usize {
    DEFAULT_EXCERPT_CHARS
}

fn default_glob() -> String {
    instrumenter_core::fs::ALL_FILES.into()
}

impl Config {
    pub fn validate(&self) {
        unknown_field_warning("tools.classify_repo", &self.unknown);
    }

    /// Returns a mock config for testing.
    pub fn mock() -> Self {
        Self {
            llm: LLMConfig::mock(),
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            glob: default_glob(),
            structured_output: false,
            unknown: HashMap::new(),
        }
    }
}
