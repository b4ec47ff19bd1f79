//! Local git operations, run through the `git` executable.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, trace};

const REDACTED: &str = "********";

/// Identity recorded on the instrumentation commit.
#[derive(Clone, Debug)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// A local clone of a repository.
pub struct Git {
    dir: PathBuf,
    /// Strings scrubbed from every command line and error message (e.g. an embedded token).
    secrets: Vec<String>,
}

impl Git {
    /// Clones `url` into `into`, which must be empty or absent.
    pub fn clone(url: &str, into: &Path, secrets: Vec<String>) -> Result<Git, GitError> {
        let parent = into.parent().unwrap_or(Path::new("."));
        let target = into.to_string_lossy();
        let git = Git {
            dir: parent.into(),
            secrets,
        };
        git.run(&["clone", "--quiet", url, &target])?;
        Ok(Git {
            dir: into.into(),
            ..git
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn checkout_new_branch(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-b", branch]).map(drop)
    }

    /// Writes each file relative to the working tree, creating parent directories. Returns the
    /// written paths. Paths that would escape the working tree or touch `.git` are rejected
    /// before anything is written.
    pub fn write_files(&self, files: &BTreeMap<String, String>) -> Result<Vec<String>, GitError> {
        for path in files.keys() {
            check_relative_path(path)?;
        }
        for (path, contents) in files {
            let full = self.dir.join(path);
            let write_error = |source| GitError::Write {
                path: path.clone(),
                source,
            };
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).map_err(write_error)?;
            }
            std::fs::write(&full, contents).map_err(write_error)?;
            debug!("Updated file: {path}");
        }
        Ok(files.keys().cloned().collect())
    }

    /// Stages `paths`, or every change in the working tree if `paths` is `None`.
    pub fn stage(&self, paths: Option<&[String]>) -> Result<(), GitError> {
        match paths {
            None => self.run(&["add", "-A"]).map(drop),
            Some(paths) => {
                let mut args = vec!["add", "--"];
                args.extend(paths.iter().map(String::as_str));
                self.run(&args).map(drop)
            }
        }
    }

    /// Paths whose staged contents differ from HEAD.
    pub fn staged_files(&self) -> Result<Vec<String>, GitError> {
        let names = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(names.lines().map(String::from).collect())
    }

    pub fn commit(&self, message: &str, author: &Author) -> Result<(), GitError> {
        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        self.run(&[
            "-c",
            &name,
            "-c",
            &email,
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "-m",
            message,
        ])
        .map(drop)
    }

    /// The changes on HEAD since it diverged from `base`. Falls back to the remote-tracking
    /// branch when `base` has no local branch (a fresh clone only has its default branch).
    pub fn diff(&self, base: &str) -> Result<String, GitError> {
        let base_ref = match self.has_ref(&format!("refs/heads/{base}")) {
            true => base.to_string(),
            false => format!("origin/{base}"),
        };
        self.run(&["diff", &format!("{base_ref}...HEAD")])
    }

    pub fn push(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["push", "--quiet", "-u", "origin", branch])
            .map(drop)
    }

    pub fn has_ref(&self, reference: &str) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", reference])
            .is_ok()
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let command = self.redact(&format!("git {}", args.join(" ")));
        trace!("Running {command} in {}", self.dir.display());
        let output = Command::new("git")
            .current_dir(&self.dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(GitError::Spawn)?;
        if !output.status.success() {
            return Err(GitError::Failed {
                command,
                output: self.redact(&failure_output(&output.stdout, &output.stderr)),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .filter(|s| !s.is_empty())
            .fold(text.to_string(), |text, secret| text.replace(secret, REDACTED))
    }
}

/// What git said about a failure. Most commands report on stderr, but some (`commit` with
/// nothing to commit) only write to stdout.
fn failure_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    match stderr.trim() {
        "" => String::from_utf8_lossy(stdout).trim().to_string(),
        stderr => stderr.to_string(),
    }
}

fn check_relative_path(path: &str) -> Result<(), GitError> {
    let invalid = || GitError::InvalidPath(path.to_string());
    let mut normal = 0;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(name) if name == ".git" => return Err(invalid()),
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }
    match normal {
        0 => Err(invalid()),
        _ => Ok(()),
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[source] io::Error),
    #[error("`{command}` failed: {output}")]
    Failed { command: String, output: String },
    #[error("refusing to write {0:?}: not a path inside the repository")]
    InvalidPath(String),
    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
}

impl GitError {
    /// Whether the remote refused access to the credentials it was given.
    pub fn is_access_denied(&self) -> bool {
        self.output_contains(|output| {
            output.contains("403")
                || output.contains("permission denied")
                || (output.contains("permission to") && output.contains("denied"))
        })
    }

    /// Whether the remote asked for credentials that were missing or rejected. Prompts are
    /// disabled, so git reports the prompt it could not show.
    pub fn is_auth_required(&self) -> bool {
        self.output_contains(|output| {
            output.contains("could not read username")
                || output.contains("could not read password")
                || output.contains("authentication failed")
                || output.contains("terminal prompts disabled")
        })
    }

    /// Whether git reported that the repository does not exist.
    pub fn is_not_found(&self) -> bool {
        self.output_contains(|output| output.contains("not found"))
    }

    fn output_contains(&self, matches: impl Fn(&str) -> bool) -> bool {
        match self {
            GitError::Failed { output, .. } => matches(&output.to_ascii_lowercase()),
            _ => false,
        }
    }
}
