//! In-memory view of a checked-out repository.
//!
//! [RepoTree::read] walks a directory once and keeps every readable UTF-8 file as a
//! [Document]. Files that cannot be decoded or opened are left out silently; they are treated
//! as binary content nobody will instrument. Directories exist only as the path components of
//! the files beneath them, so empty directories never appear.
//!
//! Sibling order is not meaningful. Nothing downstream may depend on which file was read first.

#[cfg(all(not(miri), test))]
mod tests;

use ignore::overrides::{Override, OverrideBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{read_dir, read_to_string};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Glob that selects every file.
pub const ALL_FILES: &str = "**/*";

/// A file's text plus metadata about where it came from. `metadata["source"]` is the path of the
/// file relative to the repository root, and `metadata["filename"]` is its basename.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    content: String,
    metadata: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Document {
        let source = source.into();
        let filename = source.rsplit('/').next().unwrap_or_default().to_string();
        Document {
            content: content.into(),
            metadata: BTreeMap::from([
                ("source".to_string(), Value::String(source)),
                ("filename".to_string(), Value::String(filename)),
            ]),
        }
    }

    /// Returns a copy of this document with an extra metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Document {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn source(&self) -> &str {
        self.metadata_str("source")
    }

    pub fn filename(&self) -> &str {
        self.metadata_str("filename")
    }

    fn metadata_str(&self, key: &str) -> &str {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// An element of a [RepoTree].
#[derive(Clone, Debug)]
pub enum TreeEntry {
    Dir(RepoTree),
    File(Document),
}

impl TreeEntry {
    /// Returns the contained [RepoTree] if this is a directory.
    pub fn dir(&self) -> Option<&RepoTree> {
        match self {
            TreeEntry::Dir(dir) => Some(dir),
            _ => None,
        }
    }

    /// Returns the contained [Document] if this is a file.
    pub fn file(&self) -> Option<&Document> {
        match self {
            TreeEntry::File(file) => Some(file),
            _ => None,
        }
    }
}

/// A directory of a repository: path segment to subdirectory or file.
#[derive(Clone, Debug, Default)]
pub struct RepoTree {
    entries: BTreeMap<String, TreeEntry>,
}

impl RepoTree {
    /// Reads every file under `root`.
    pub fn read<P: AsRef<Path>>(root: P) -> Result<RepoTree, TreeReadError> {
        Self::read_matching(root, ALL_FILES)
    }

    /// Reads the files under `root` whose root-relative path matches `glob`. Hidden files and
    /// directories (such as `.git`) are skipped.
    pub fn read_matching<P: AsRef<Path>>(root: P, glob: &str) -> Result<RepoTree, TreeReadError> {
        let root = root.as_ref();
        // Only the root itself is allowed to make the whole read fail.
        read_dir(root).map_err(|source| TreeReadError::Root {
            path: root.into(),
            source,
        })?;
        let filter = build_filter(root, glob)?;

        let mut tree = RepoTree::default();
        let (mut files, mut skipped) = (0, 0);
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {e}");
                    skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative) = relative_source(root, entry.path()) else {
                continue;
            };
            if !filter.matched(&relative, false).is_whitelist() {
                continue;
            }
            let content = match read_to_string(entry.path()) {
                Ok(content) => content,
                Err(e) => {
                    debug!("Skipping {relative}: {e}");
                    skipped += 1;
                    continue;
                }
            };
            let document = Document::new(content, relative.as_str())
                .with_metadata("absolute_path", entry.path().to_string_lossy().as_ref());
            tree.insert(&relative, document)?;
            files += 1;
        }
        info!(
            "Read {files} files from {} ({skipped} skipped).",
            root.display()
        );
        Ok(tree)
    }

    /// Adds `document` at the `/`-separated `path`, creating intermediate directories.
    pub fn insert(&mut self, path: &str, document: Document) -> Result<(), TreeReadError> {
        let conflict = || TreeReadError::Conflict(path.to_string());
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        let mut cur = self;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                return match cur.entries.get(segment) {
                    Some(_) => Err(conflict()),
                    None => {
                        cur.entries
                            .insert(segment.to_string(), TreeEntry::File(document));
                        Ok(())
                    }
                };
            }
            let entry = cur
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| TreeEntry::Dir(RepoTree::default()));
            cur = match entry {
                TreeEntry::Dir(dir) => dir,
                TreeEntry::File(_) => return Err(conflict()),
            };
        }
        Err(conflict())
    }

    /// Retrieves the entry at `path` (relative to this directory).
    pub fn get<P: AsRef<Path>>(&self, path: P) -> Result<&TreeEntry, GetError> {
        use Component::*;
        let mut components = path.as_ref().components().filter(|c| *c != CurDir);
        let Some(first) = components.next() else {
            return Err(GetError::NotFound);
        };
        let mut cur_dir = self;
        let mut component = first;
        loop {
            let name = match component {
                Prefix(_) | RootDir | ParentDir => return Err(GetError::LeavesTree),
                CurDir => unreachable!("filtered above"),
                Normal(name) => name.to_str().ok_or(GetError::NotFound)?,
            };
            let entry = cur_dir.entries.get(name).ok_or(GetError::NotFound)?;
            match (components.next(), entry) {
                (None, entry) => return Ok(entry),
                (Some(next), TreeEntry::Dir(dir)) => {
                    cur_dir = dir;
                    component = next;
                }
                (Some(_), TreeEntry::File(_)) => return Err(GetError::NotADirectory),
            }
        }
    }

    /// Retrieves the file at `path`, if there is one.
    pub fn get_document<P: AsRef<Path>>(&self, path: P) -> Option<&Document> {
        self.get(path).ok().and_then(TreeEntry::file)
    }

    /// Iterates through the direct contents of this directory.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &TreeEntry)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), e))
    }

    /// Returns every file in this directory and its subdirectories.
    pub fn documents(&self) -> Vec<&Document> {
        let mut out = Vec::new();
        self.collect_documents(&mut out);
        out
    }

    fn collect_documents<'a>(&'a self, out: &mut Vec<&'a Document>) {
        for entry in self.entries.values() {
            match entry {
                TreeEntry::Dir(dir) => dir.collect_documents(out),
                TreeEntry::File(document) => out.push(document),
            }
        }
    }

    /// Finds a file by basename anywhere in the tree.
    pub fn find_by_filename(&self, filename: &str) -> Option<&Document> {
        self.documents()
            .into_iter()
            .find(|d| d.filename() == filename)
    }

    /// The number of files in the tree.
    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_filter(root: &Path, glob: &str) -> Result<Override, TreeReadError> {
    let invalid = |e: ignore::Error| TreeReadError::InvalidGlob {
        glob: glob.to_string(),
        message: e.to_string(),
    };
    let mut builder = OverrideBuilder::new(root);
    builder.add(glob).map_err(invalid)?;
    builder.build().map_err(invalid)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// `path` relative to `root`, `/`-separated. `None` for non-UTF-8 paths.
fn relative_source(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(segments?.join("/"))
}

/// An error returned from [RepoTree::read] or [RepoTree::insert].
#[derive(Debug, Error)]
pub enum TreeReadError {
    #[error("failed to read repository root {}: {source}", path.display())]
    Root { path: PathBuf, source: io::Error },
    #[error("invalid file glob {glob:?}: {message}")]
    InvalidGlob { glob: String, message: String },
    #[error("path {0} is both a file and a directory")]
    Conflict(String),
}

/// An error returned from [RepoTree::get].
#[derive(Debug, Error, Hash, Eq, PartialEq)]
pub enum GetError {
    #[error("path leaves the tree")]
    LeavesTree,
    #[error("intermediate path component is a file")]
    NotADirectory,
    #[error("file or directory not found")]
    NotFound,
}
