//! Building blocks shared by the instrumenter's tools: configuration, the LLM client and its
//! response parsing, the in-memory repository tree, prompt templates, and session storage.

pub mod config;
pub mod fs;
pub mod llm;
pub mod prompts;
pub mod session;
pub mod test_util;

pub use fs::{Document, GetError, RepoTree, TreeEntry, TreeReadError};
