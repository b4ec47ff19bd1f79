//! Writes the title and body of the instrumentation pull request from the committed diff.
//!
//! Unlike the other model-backed tools, a failure here never stops the workflow: the generic
//! [PRDescription::fallback] is used instead.

use instrumenter_core::config::unknown_field_warning;
use instrumenter_core::llm::{Completion, InstrumenterLLM, LLMConfig, LlmError, complete_json};
use instrumenter_core::prompts::{DESCRIBE_PR, PromptTemplates, TemplateError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Structured output JSON schema, for backends that support it.
const STRUCTURED_OUTPUT_SCHEMA: &str = include_str!("structured_schema.json");

const FOOTER: &str = "*This PR was generated automatically by the DD Instrumenter Agent*";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PRDescription {
    pub title: String,
    pub description: String,
    pub summary: Vec<String>,
}

impl PRDescription {
    /// The description used when the model cannot produce one.
    pub fn fallback() -> PRDescription {
        PRDescription {
            title: "Add Datadog instrumentation to Lambda functions".into(),
            description: "This PR adds Datadog monitoring and tracing instrumentation to AWS \
                          Lambda functions in the infrastructure code."
                .into(),
            summary: vec![
                "Added Datadog Lambda Extension layer".into(),
                "Added Datadog Tracing layer".into(),
                "Configured DD_ENV, DD_SERVICE, and DD_VERSION environment variables".into(),
            ],
        }
    }

    /// The pull request body: the description, a bulleted list of changes, and a footer.
    pub fn body(&self) -> String {
        let changes: Vec<String> = self.summary.iter().map(|item| format!("- {item}")).collect();
        format!(
            "{}\n\n## Changes Made\n{}\n\n---\n{FOOTER}",
            self.description,
            changes.join("\n")
        )
    }
}

pub struct PrDescriber {
    llm: Box<dyn Completion>,
    templates: PromptTemplates,
}

impl PrDescriber {
    pub fn new(llm: Box<dyn Completion>, templates: PromptTemplates) -> PrDescriber {
        PrDescriber { llm, templates }
    }

    pub fn from_config(config: &Config, templates: PromptTemplates) -> Result<PrDescriber, LlmError> {
        debug!("LLM Configuration {:?}", config.llm);
        let schema = config.structured_output.then_some(STRUCTURED_OUTPUT_SCHEMA);
        let llm = InstrumenterLLM::build(&config.llm, schema)?;
        Ok(Self::new(Box::new(llm), templates))
    }

    /// Describes the change in `diff`, which touches `files`. Never fails.
    pub fn describe(&self, diff: &str, files: &[String]) -> PRDescription {
        match self.try_describe(diff, files) {
            Ok(description) => {
                info!("Generated PR description {:?}", description.title);
                description
            }
            Err(e) => {
                warn!("Could not generate PR description, using the default: {e}");
                if let Some(raw) = e.raw_response() {
                    debug!("Raw PR description response: {raw}");
                }
                PRDescription::fallback()
            }
        }
    }

    fn try_describe(&self, diff: &str, files: &[String]) -> Result<PRDescription, DescribeError> {
        let prompt = self
            .templates
            .render(DESCRIBE_PR, &[("files", &files.join(", ")), ("diff", diff)])?;
        let description: PRDescription = complete_json(self.llm.as_ref(), &prompt)?;
        if description.title.trim().is_empty() {
            return Err(DescribeError::EmptyTitle);
        }
        Ok(description)
    }
}

/// Internal; always replaced by the fallback description.
#[derive(Debug, Error)]
enum DescribeError {
    #[error("{0}")]
    Template(#[from] TemplateError),
    #[error("{0}")]
    Llm(#[from] LlmError),
    #[error("model returned an empty title")]
    EmptyTitle,
}

impl DescribeError {
    fn raw_response(&self) -> Option<&str> {
        match self {
            DescribeError::Llm(e) => e.raw_response(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// LLM configuration.
    #[serde(flatten)]
    pub llm: LLMConfig,

    /// Ask the backend to constrain its output to the description's JSON schema.
    #[serde(default)]
    pub structured_output: bool,

    #[serde(flatten)]
    unknown: HashMap<String, Value>,
}

impl Config {
    pub fn validate(&self) {
        unknown_field_warning("tools.describe_pr", &self.unknown);
    }

    /// Returns a mock config for testing.
    pub fn mock() -> Self {
        Self {
            llm: LLMConfig::mock(),
            structured_output: false,
            unknown: HashMap::new(),
        }
    }
}
