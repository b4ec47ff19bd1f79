use std::fmt::{self, Display};
use thiserror::Error;
use url::Url;

/// A GitHub repository, identified by owner and name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses `owner/repo`, `https://github.com/owner/repo[.git]`, or
    /// `git@github.com:owner/repo.git`.
    pub fn parse(identifier: &str) -> Result<RepoRef, InvalidRepository> {
        let invalid = || InvalidRepository(identifier.to_string());
        let trimmed = identifier.trim();
        let path = if let Some(rest) = trimmed.strip_prefix("git@") {
            rest.split_once(':').ok_or_else(invalid)?.1.to_string()
        } else if trimmed.contains("://") {
            let url = Url::parse(trimmed).map_err(|_| invalid())?;
            if url.host_str().is_none() {
                return Err(invalid());
            }
            url.path().to_string()
        } else {
            trimmed.to_string()
        };
        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        match path.split('/').collect::<Vec<_>>()[..] {
            [owner, name] if valid_segment(owner) && valid_segment(name) => Ok(RepoRef {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    /// `owner/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid repository identifier {0:?}; expected owner/repo or a GitHub URL")]
pub struct InvalidRepository(pub String);
