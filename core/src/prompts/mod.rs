//! Named prompt templates and placeholder substitution.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` produce literal braces (prompts that show
//! the model a JSON example need them). Every placeholder must be supplied when rendering.


use std::collections::BTreeMap;
use std::path::Path;
use std::{fs, io};
use thiserror::Error;
use tracing::debug;

pub const CLASSIFY_REPO: &str = "classify_repo";
pub const INSTRUMENT_SCRIPT: &str = "instrument_script";
pub const DESCRIBE_PR: &str = "describe_pr";

/// A set of prompt templates, keyed by name.
#[derive(Clone, Debug)]
pub struct PromptTemplates {
    templates: BTreeMap<String, String>,
}

impl PromptTemplates {
    /// The templates compiled into the binary.
    pub fn builtin() -> PromptTemplates {
        let templates = [
            (CLASSIFY_REPO, include_str!("classify_repo.md")),
            (INSTRUMENT_SCRIPT, include_str!("instrument_script.md")),
            (DESCRIBE_PR, include_str!("describe_pr.md")),
        ];
        PromptTemplates {
            templates: templates
                .into_iter()
                .map(|(name, text)| (name.to_string(), text.to_string()))
                .collect(),
        }
    }

    /// The built-in templates, with every `<name>.md` file in `dir` (if given) replacing or
    /// adding the template called `<name>`.
    pub fn load(dir: Option<&Path>) -> Result<PromptTemplates, TemplateError> {
        let mut templates = Self::builtin();
        if let Some(dir) = dir {
            templates.load_overrides(dir)?;
        }
        Ok(templates)
    }

    fn load_overrides(&mut self, dir: &Path) -> Result<(), TemplateError> {
        let io_error = |source| TemplateError::Io {
            path: dir.display().to_string(),
            source,
        };
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().is_none_or(|ext| ext != "md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                path: path.display().to_string(),
                source,
            })?;
            debug!("Prompt template {name} overridden by {}", path.display());
            self.templates.insert(name.to_string(), text);
        }
        Ok(())
    }

    /// Adds or replaces a template.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.templates.insert(name.into(), text.into());
    }

    /// Renders template `name`, substituting each `{variable}` from `vars`. Extra entries in
    /// `vars` are ignored; a placeholder without a value is an error.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;
        substitute(name, template, vars)
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

fn substitute(name: &str, template: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
    let malformed = |offset: usize| TemplateError::Malformed {
        template: name.to_string(),
        offset,
    };
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let offset = template.len() - rest.len() + pos;
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            return Err(malformed(offset));
        } else {
            let end = tail.find('}').ok_or_else(|| malformed(offset))?;
            let variable = &tail[1..end];
            if !is_identifier(variable) {
                return Err(malformed(offset));
            }
            let value = vars
                .iter()
                .find(|(key, _)| *key == variable)
                .map(|(_, value)| *value)
                .ok_or_else(|| TemplateError::MissingVariable {
                    template: name.to_string(),
                    variable: variable.to_string(),
                })?;
            out.push_str(value);
            rest = &tail[end + 1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no prompt template named {0:?}")]
    UnknownTemplate(String),
    #[error("prompt template {template:?} needs a value for {{{variable}}}")]
    MissingVariable { template: String, variable: String },
    #[error("prompt template {template:?} has an unbalanced brace at byte {offset}")]
    Malformed { template: String, offset: usize },
    #[error("failed to read prompt templates from {path}: {source}")]
    Io { path: String, source: io::Error },
}
