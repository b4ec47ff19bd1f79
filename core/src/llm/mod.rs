//! This module provides a simplified synchronous wrapper around the `llm` crate.
//! Every tool that talks to a model goes through [Completion], which keeps the request shape
//! (one user message, temperature 0) in one place and lets tests substitute a scripted model.
//! Responses are expected to carry a single JSON object; [parse_json_response] and
//! [complete_json] turn them into typed values.


use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
pub use llm::chat::ChatMessage;
use llm::chat::StructuredOutputFormat;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;
use tracing::trace;

/// API Key wrapper that hides the key in debug output.
#[derive(Clone, Deserialize)]
pub struct ApiKey(pub String);

impl ApiKey {
    /// Returns the key, or `None` if it is blank.
    pub fn non_empty(&self) -> Option<&str> {
        match self.0.trim() {
            "" => None,
            key => Some(key),
        }
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("********")
    }
}

/// Configuration for LLM clients.
#[derive(Debug, Deserialize)]
pub struct LLMConfig {
    /// Hostname and port at which to find the LLM serve. Example: "http://[::1]:11434"
    pub address: Option<String>,

    /// API Key for the LLM service.
    pub api_key: Option<ApiKey>,

    /// Which backend to use, e.g. "openai" or "ollama".
    pub backend: String,

    /// Name of the model to invoke.
    pub model: String,

    /// Maximum output tokens.
    pub max_tokens: u32,

    /// Abandon a completion request after this many seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl LLMConfig {
    /// Returns a mock config for testing.
    pub fn mock() -> Self {
        Self {
            address: None,
            api_key: None,
            backend: "openai".into(),
            model: "mock_model".into(),
            max_tokens: 1000,
            timeout_seconds: None,
        }
    }
}

/// A model that turns one fully rendered prompt into one text completion.
pub trait Completion {
    fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Wrapper for an LLM client built from [LLMConfig].
pub struct InstrumenterLLM {
    client: Box<dyn LLMProvider>,
}

impl InstrumenterLLM {
    /// Builds an LLM client from configuration. `output_format_json`, if given, is a structured
    /// output schema for backends that support constrained JSON output.
    pub fn build(config: &LLMConfig, output_format_json: Option<&str>) -> Result<Self, LlmError> {
        let backend = LLMBackend::from_str(&config.backend)
            .map_err(|e| LlmError::Build(format!("unknown backend {:?}: {e}", config.backend)))?;

        let mut llm_builder = LLMBuilder::new()
            .backend(backend)
            .model(&config.model)
            .max_tokens(config.max_tokens)
            .temperature(0.0);

        if let Some(output_format_json) = output_format_json {
            let output_format: StructuredOutputFormat = serde_json::from_str(output_format_json)
                .map_err(|e| LlmError::Build(format!("invalid output schema: {e}")))?;
            llm_builder = llm_builder.schema(output_format);
        }
        if let Some(ref address) = config.address
            && !address.is_empty()
        {
            llm_builder = llm_builder.base_url(address);
        }
        if let Some(key) = config.api_key.as_ref().and_then(ApiKey::non_empty) {
            llm_builder = llm_builder.api_key(key);
        }
        if let Some(timeout) = config.timeout_seconds {
            llm_builder = llm_builder.timeout_seconds(timeout);
        }

        let client = llm_builder
            .build()
            .map_err(|e| LlmError::Build(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Completion for InstrumenterLLM {
    fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = [ChatMessage::user().content(prompt).build()];
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(|e| LlmError::Call(format!("failed to start async runtime: {e}")))?;
        let response = runtime
            .block_on(self.client.chat(&request))
            .map_err(|e| LlmError::Call(e.to_string()))?;
        Ok(response.text().unwrap_or_default())
    }
}

/// Sends `prompt` and decodes the single JSON object in the reply into `T`.
///
/// An empty reply is reported as [LlmError::EmptyResponse] before any parsing is attempted.
/// Replies that are not JSON fail with [LlmError::Parse]; JSON that does not match `T` fails
/// with [LlmError::Validation]. Both keep the raw reply.
pub fn complete_json<T: DeserializeOwned>(
    llm: &dyn Completion,
    prompt: &str,
) -> Result<T, LlmError> {
    trace!("Making LLM call with prompt:\n{prompt}");
    let response = llm.complete(prompt)?;
    trace!("LLM responded: {response:?}");
    if response.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    let value = parse_json_response(&response)?;
    serde_json::from_value(value).map_err(|e| LlmError::Validation {
        message: e.to_string(),
        raw: response,
    })
}

/// Parses the JSON object in a model reply.
///
/// Models often wrap JSON in Markdown fences, so this first strips a leading fence line
/// (```` ``` ```` or ```` ```json ````) and a trailing fence before decoding. If that fails, the
/// span from the first `{` to the last `}` is decoded instead.
pub fn parse_json_response(response: &str) -> Result<Value, LlmError> {
    let first_error = match serde_json::from_str(strip_fences(response)) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str(&response[start..=end])
    {
        return Ok(value);
    }
    Err(LlmError::Parse {
        source: first_error,
        raw: response.to_string(),
    })
}

/// Removes a Markdown code fence around `text`, if present.
fn strip_fences(text: &str) -> &str {
    let mut text = text.trim();
    if text.starts_with("```") {
        text = match text.split_once('\n') {
            Some((_, rest)) => rest,
            None => text.trim_start_matches("```json").trim_start_matches("```"),
        };
    }
    text = text.trim_end();
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// An error from an LLM round trip.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to build LLM client: {0}")]
    Build(String),
    #[error("LLM call failed: {0}")]
    Call(String),
    #[error("LLM returned an empty response")]
    EmptyResponse,
    #[error("LLM response is not valid JSON: {source}")]
    Parse {
        source: serde_json::Error,
        raw: String,
    },
    #[error("LLM response does not match the expected shape: {message}")]
    Validation { message: String, raw: String },
}

impl LlmError {
    /// The raw model output, for errors that happened after a response arrived.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            LlmError::Parse { raw, .. } | LlmError::Validation { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
