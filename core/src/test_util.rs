//! Place to put utilities that are only used by tests.

use crate::llm::{Completion, LlmError};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

/// Returns a new temporary directory. Unlike the defaults in the `tempdir` and `tempfile` crates,
/// this directory is not world-accessible by default.
#[cfg(not(miri))]
pub fn tempdir() -> std::io::Result<tempfile::TempDir> {
    use std::fs::Permissions;
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o700));
    }
    builder.tempdir()
}

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// A model that can be programmed to have many different behaviors, for testing code that makes
/// LLM calls. Every prompt it receives is recorded.
pub struct MockLLM {
    respond: Responder,
    prompts: PromptLog,
}

impl Default for MockLLM {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder-style API for configuring how this MockLLM behaves.
///
/// # Example
/// ```
/// use instrumenter_core::llm::Completion;
/// use instrumenter_core::test_util::MockLLM;
/// let llm = MockLLM::new().reply(r#"{"title": "t"}"#);
/// let prompts = llm.prompts();
/// assert_eq!(llm.complete("hello").unwrap(), r#"{"title": "t"}"#);
/// assert_eq!(prompts.last().as_deref(), Some("hello"));
/// ```
impl MockLLM {
    /// Creates a new MockLLM that replies with an empty completion.
    pub fn new() -> MockLLM {
        MockLLM {
            respond: Box::new(|_| Ok(String::new())),
            prompts: PromptLog::default(),
        }
    }

    /// Returns this MockLLM in a box. For use when a `Box<dyn Completion>` is needed.
    pub fn boxed(self) -> Box<MockLLM> {
        self.into()
    }

    /// Replies to every prompt with `text`.
    pub fn reply(self, text: &str) -> MockLLM {
        let text = text.to_string();
        self.respond(move |_| Ok(text.clone()))
    }

    /// Fails every call with [LlmError::Call].
    pub fn fail(self, message: &str) -> MockLLM {
        let message = message.to_string();
        self.respond(move |_| Err(LlmError::Call(message.clone())))
    }

    /// Sets a closure to be run on every call.
    pub fn respond<F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static>(
        mut self,
        f: F,
    ) -> MockLLM {
        self.respond = Box::new(f);
        self
    }

    /// A handle to the prompts this MockLLM receives. Stays valid after the MockLLM is moved.
    pub fn prompts(&self) -> PromptLog {
        self.prompts.clone()
    }
}

impl Completion for MockLLM {
    fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.push(prompt);
        (self.respond)(prompt)
    }
}

/// Shared record of the prompts a [MockLLM] received.
#[derive(Clone, Debug, Default)]
pub struct PromptLog(Arc<Mutex<Vec<String>>>);

impl PromptLog {
    fn push(&self, prompt: &str) {
        self.lock().push(prompt.to_string());
    }

    pub fn all(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A local bare git repository standing in for a GitHub remote. It starts with one commit on
/// `main` containing the files it was created with.
#[cfg(not(miri))]
pub struct GitFixture {
    _dir: tempfile::TempDir,
    remote: PathBuf,
}

#[cfg(not(miri))]
impl GitFixture {
    pub fn new(files: &[(&str, &str)]) -> io::Result<GitFixture> {
        let dir = tempdir()?;
        let remote = dir.path().join("origin.git");
        let seed = dir.path().join("seed");
        std::fs::create_dir(&seed)?;
        git(dir.path(), &["init", "--bare", "origin.git"])?;
        git(&seed, &["init"])?;
        git(&seed, &["checkout", "-b", "main"])?;
        for (path, contents) in files {
            let path = seed.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        git(&seed, &["add", "-A"])?;
        git(
            &seed,
            &[
                "-c",
                "user.name=Fixture",
                "-c",
                "user.email=fixture@example.com",
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--allow-empty",
                "-m",
                "Initial commit",
            ],
        )?;
        git(&seed, &["remote", "add", "origin", &path_str(&remote)?])?;
        git(&seed, &["push", "origin", "main"])?;
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        Ok(GitFixture { _dir: dir, remote })
    }

    /// URL to clone the fixture from.
    pub fn remote_url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Whether `branch` has been pushed to the fixture.
    pub fn branch_exists(&self, branch: &str) -> bool {
        let reference = format!("refs/heads/{branch}");
        git(&self.remote, &["rev-parse", "--verify", "--quiet", &reference]).is_ok()
    }

    /// Contents of `path` at revision `rev` in the fixture.
    pub fn show(&self, rev: &str, path: &str) -> io::Result<String> {
        git(&self.remote, &["show", &format!("{rev}:{path}")])
    }

    /// Makes every push to the fixture fail, with `message` relayed to the pusher the way a
    /// server-side rejection is.
    #[cfg(unix)]
    pub fn reject_pushes(&self, message: &str) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let hook = self.remote.join("hooks").join("pre-receive");
        std::fs::create_dir_all(self.remote.join("hooks"))?;
        let message = message.replace('\'', "'\\''");
        std::fs::write(&hook, format!("#!/bin/sh\necho '{message}' >&2\nexit 1\n"))?;
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755))
    }

    /// Subject line of the newest commit on `rev`.
    pub fn subject(&self, rev: &str) -> io::Result<String> {
        git(&self.remote, &["log", "-1", "--format=%s", rev]).map(|s| s.trim().to_string())
    }
}

#[cfg(not(miri))]
fn path_str(path: &Path) -> io::Result<String> {
    path.to_str()
        .map(String::from)
        .ok_or_else(|| io::Error::other("non-UTF-8 path"))
}

/// Runs git in `dir`, returning its stdout.
#[cfg(not(miri))]
fn git(dir: &Path, args: &[&str]) -> io::Result<String> {
    let output = Command::new("git").current_dir(dir).args(args).output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
