//! Repository discovery through libgit2.
//!
//! Used before any command runs to find the repository root that the
//! executor works in and that configuration is loaded from.

use std::path::{Path, PathBuf};

use git2::Repository;

/// Location and identity of a discovered repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    /// Working tree root
    pub root: PathBuf,

    /// URL of the configured remote, if any
    pub remote_url: Option<String>,
}

impl RepoLocation {
    /// Search upwards from `path` for a repository with a working tree.
    #[must_use]
    pub fn discover(path: impl AsRef<Path>, remote: &str) -> Option<Self> {
        let repo = Repository::discover(path.as_ref()).ok()?;
        let root = repo.workdir()?.to_path_buf();
        let remote_url = repo.find_remote(remote).ok().and_then(|r| r.url().map(String::from));
        Some(Self { root, remote_url })
    }

    /// `owner/name` parsed from a GitHub remote URL.
    pub fn github_slug(&self) -> Option<String> {
        self.remote_url.as_deref().and_then(super::parse_github_slug)
    }
}
