//! Asks a model to rewrite an infrastructure script so that its Lambda functions are
//! instrumented. The model returns whole files, never diffs; applying a result is a matter of
//! overwriting each file in `file_changes`.


use classify_repo::{IacTool, Runtime};
use instrumenter_core::Document;
use instrumenter_core::config::unknown_field_warning;
use instrumenter_core::llm::{Completion, InstrumenterLLM, LLMConfig, LlmError, complete_json};
use instrumenter_core::prompts::{INSTRUMENT_SCRIPT, PromptTemplates, TemplateError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info};

/// The only kind of instrumentation this tool performs.
pub const INSTRUMENTATION_TYPE: &str = "datadog_lambda_instrumentation";

/// The rewritten files and what the model says about them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentationResult {
    /// Repository-relative path to the complete new content of that file.
    pub file_changes: BTreeMap<String, String>,
    #[serde(
        default = "instrumentation_type",
        deserialize_with = "expect_instrumentation_type"
    )]
    pub instrumentation_type: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub doc_urls: Vec<String>,
}

fn instrumentation_type() -> String {
    INSTRUMENTATION_TYPE.into()
}

fn expect_instrumentation_type<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let tag = String::deserialize(d)?;
    match tag == INSTRUMENTATION_TYPE {
        true => Ok(tag),
        false => Err(D::Error::custom(format!(
            "instrumentation_type must be {INSTRUMENTATION_TYPE:?}, not {tag:?}"
        ))),
    }
}

/// Everything that goes into one instrumentation prompt.
#[derive(Clone, Copy, Debug)]
pub struct InstrumentRequest<'a> {
    pub script: &'a Document,
    pub tool: IacTool,
    /// Installation instructions, embedded verbatim. May be empty.
    pub documentation: &'a str,
    pub runtime: Option<Runtime>,
    /// Free-text customization instructions from the user. May be empty.
    pub additional_context: &'a str,
    /// Where `documentation` came from, recorded in the result's `doc_urls`.
    pub doc_url: Option<&'a str>,
}

pub struct ScriptInstrumenter {
    llm: Box<dyn Completion>,
    templates: PromptTemplates,
}

impl ScriptInstrumenter {
    pub fn new(llm: Box<dyn Completion>, templates: PromptTemplates) -> ScriptInstrumenter {
        ScriptInstrumenter { llm, templates }
    }

    pub fn from_config(
        config: &Config,
        templates: PromptTemplates,
    ) -> Result<ScriptInstrumenter, InstrumentError> {
        debug!("LLM Configuration {:?}", config.llm);
        let llm = InstrumenterLLM::build(&config.llm, None)?;
        Ok(Self::new(Box::new(llm), templates))
    }

    pub fn instrument(
        &self,
        request: &InstrumentRequest,
    ) -> Result<InstrumentationResult, InstrumentError> {
        let script_path = request.script.source();
        info!("Instrumenting {} file {script_path}", request.tool);
        let runtime = request.runtime.map(Runtime::as_str).unwrap_or("not detected");
        let documentation = match request.documentation.trim() {
            "" => "No documentation is available; rely on your knowledge of Datadog's AWS Lambda installation instructions.",
            docs => docs,
        };
        let additional_context = match request.additional_context.trim() {
            "" => "None.",
            context => context,
        };
        let prompt = self.templates.render(
            INSTRUMENT_SCRIPT,
            &[
                ("file_kind", request.tool.label()),
                ("documentation", documentation),
                ("runtime", runtime),
                ("script_path", script_path),
                ("script_content", request.script.content()),
                ("additional_context", additional_context),
            ],
        )?;

        let mut result: InstrumentationResult = complete_json(self.llm.as_ref(), &prompt)?;
        if result.file_changes.is_empty() {
            return Err(InstrumentError::NoChanges);
        }
        if let Some(url) = request.doc_url
            && !result.doc_urls.iter().any(|u| u == url)
        {
            result.doc_urls.push(url.to_string());
        }
        info!(
            "Model rewrote {} file(s): {:?}",
            result.file_changes.len(),
            result.file_changes.keys().collect::<Vec<_>>()
        );
        Ok(result)
    }
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("instrumentation failed: {0}")]
    Llm(#[from] LlmError),
    #[error("instrumentation produced no file changes")]
    NoChanges,
}

impl InstrumentError {
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            InstrumentError::Llm(e) => e.raw_response(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// LLM configuration.
    #[serde(flatten)]
    pub llm: LLMConfig,

    #[serde(flatten)]
    unknown: HashMap<String, Value>,
}

impl Config {
    pub fn validate(&self) {
        unknown_field_warning("tools.instrument_script", &self.unknown);
    }

    /// Returns a mock config for testing.
    pub fn mock() -> Self {
        Self {
            llm: LLMConfig::mock(),
            unknown: HashMap::new(),
        }
    }
}
