//! The configuration model shared by the instrumenter's tools.
//!
//! Loading (layering the default config, the user's config file, and command-line overrides)
//! lives in the `instrumenter` crate. This module only defines the shape of the result and the
//! helpers tools use to pull their own section out of it.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level configuration for one instrumenter process.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Directory under which each workflow invocation creates its own clone directory. Empty
    /// means the system temporary directory.
    #[serde(default)]
    pub workspace: PathBuf,

    /// Keep the clone directory around after a successful run.
    #[serde(default)]
    pub keep_clone: bool,

    /// Optional directory of `<name>.md` files overriding the built-in prompt templates.
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,

    /// Sub-configuration for each tool, keyed by the tool's name.
    #[serde(default)]
    pub tools: HashMap<String, Value>,

    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

impl Config {
    /// Deserializes the `tools.<name>` section.
    pub fn tool<T: DeserializeOwned>(&self, name: &str) -> Result<T, ConfigError> {
        let section = self
            .tools
            .get(name)
            .ok_or_else(|| ConfigError::MissingTool(name.to_string()))?;
        T::deserialize(section).map_err(|source| ConfigError::InvalidTool {
            name: name.to_string(),
            source,
        })
    }

    /// Prints warnings for unrecognized top-level keys.
    pub fn validate(&self) {
        unknown_field_warning("", &self.unknown);
    }

    /// Returns a mock config for testing. Every tool section is present and points at a
    /// backend that is never contacted.
    pub fn mock() -> Self {
        let llm = serde_json::json!({
            "backend": "openai",
            "model": "mock_model",
            "max_tokens": 1000,
        });
        let tools = HashMap::from([
            ("classify_repo".to_string(), llm.clone()),
            ("instrument_script".to_string(), llm.clone()),
            ("describe_pr".to_string(), llm),
            (
                "fetch_docs".to_string(),
                serde_json::json!({ "base_url": "http://127.0.0.1:9" }),
            ),
            (
                "github_pr".to_string(),
                serde_json::json!({ "api_url": "http://127.0.0.1:9" }),
            ),
        ]);
        Self {
            workspace: PathBuf::new(),
            keep_clone: false,
            prompts_dir: None,
            tools,
            unknown: HashMap::new(),
        }
    }
}

/// An error retrieving a tool's section of the config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no [tools.{0}] section in the configuration")]
    MissingTool(String),
    #[error("invalid [tools.{name}] configuration: {source}")]
    InvalidTool {
        name: String,
        source: serde_json::Error,
    },
}

/// Prints out a warning message for every field in `unknown`.
///
/// This is intended for use by config validation routines. `prefix` should be the path to this
/// entry (e.g. the `classify_repo` tool config calls this with `tools.classify_repo`).
pub fn unknown_field_warning(prefix: &str, unknown: &HashMap<String, Value>) {
    let mut entries: Vec<_> = unknown.keys().collect();
    entries.sort_unstable();
    entries.into_iter().for_each(|name| match prefix {
        "" => eprintln!("Warning: unknown config key {name}"),
        p => eprintln!("Warning: unknown config key {p}.{name}"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Section {
        model: String,
    }

    #[test]
    fn tool_section_lookup() {
        let config = Config::mock();
        let section: Section = config.tool("classify_repo").unwrap();
        assert_eq!(section.model, "mock_model");
        assert!(matches!(
            config.tool::<Section>("nonexistent"),
            Err(ConfigError::MissingTool(name)) if name == "nonexistent"
        ));
        assert!(matches!(
            config.tool::<Section>("github_pr"),
            Err(ConfigError::InvalidTool { .. })
        ));
    }
}
