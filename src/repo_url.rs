//! Repository coordinate parsing.
//!
//! Projects store their repository as `<host>/<owner>/<name>` (for example
//! `github.com/acme/widgets`). The host segment only has to be non-empty;
//! the provider base URL is configured separately.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoUrlError {
    #[error("repository coordinate is empty")]
    EmptyInput,
    #[error("malformed repository coordinate `{0}`, expected <host>/<owner>/<name>")]
    Malformed(String),
}

/// Owner and name of a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse a `<host>/<owner>/<name>` coordinate.
    pub fn parse(raw: &str) -> Result<Self, RepoUrlError> {
        if raw.is_empty() {
            return Err(RepoUrlError::EmptyInput);
        }
        let parts: Vec<&str> = raw.split('/').collect();
        match parts.as_slice() {
            [host, owner, name] if !host.is_empty() && !owner.is_empty() && !name.is_empty() => {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(RepoUrlError::Malformed(raw.to_string())),
        }
    }

    pub fn as_slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_coordinate() {
        let repo = RepoRef::parse("github.com/acme/widgets").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.as_slug(), "acme/widgets");
    }

    #[test]
    fn host_is_not_validated() {
        let repo = RepoRef::parse("x/o/n").unwrap();
        assert_eq!(repo, RepoRef { owner: "o".into(), name: "n".into() });
    }

    #[test]
    fn empty_input_is_distinct_error() {
        assert_eq!(RepoRef::parse(""), Err(RepoUrlError::EmptyInput));
    }

    #[test]
    fn rejects_wrong_segment_counts() {
        for raw in [
            "acme/widgets",
            "github.com/acme/widgets/tree/main",
            "https://github.com/acme/widgets",
            "github.com/acme/widgets/",
            "widgets",
        ] {
            assert!(
                matches!(RepoRef::parse(raw), Err(RepoUrlError::Malformed(_))),
                "expected `{}` to be rejected",
                raw
            );
        }
    }

    #[test]
    fn rejects_empty_segments() {
        for raw in ["/acme/widgets", "github.com//widgets", "github.com/acme/", "//"] {
            assert!(matches!(RepoRef::parse(raw), Err(RepoUrlError::Malformed(_))));
        }
    }
}
