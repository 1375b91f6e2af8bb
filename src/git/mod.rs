//! Version-control integration.
//!
//! Named git queries and mutations issued through the [`Executor`], plus
//! the parsing functions that interpret their output. Queries go through
//! the result cache unless the caller asks for a fresh answer.

#[cfg(feature = "git")]
mod repository;

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{quote, CommandResult, ExecOptions, Executor, WorkflowError};

#[cfg(feature = "git")]
pub use repository::RepoLocation;

/// Query printing the current branch name.
pub const CURRENT_BRANCH: &str = "git rev-parse --abbrev-ref HEAD";

/// Query printing one line per changed path.
pub const STATUS_PORCELAIN: &str = "git status --porcelain";

/// Query printing a diff summary against HEAD.
pub const DIFF_STAT: &str = "git diff --stat HEAD";

/// Query listing stash entries.
pub const STASH_LIST: &str = "git stash list";

/// Counts of changed paths by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Changes staged in the index
    pub staged: usize,
    /// Changes in the working tree not yet staged
    pub unstaged: usize,
    /// Untracked files
    pub untracked: usize,
}

impl StatusCounts {
    /// Whether there is anything to commit.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.staged > 0 || self.unstaged > 0 || self.untracked > 0
    }

    /// Compact status string for display.
    #[must_use]
    pub fn status_string(&self) -> String {
        let mut parts = Vec::new();
        if self.staged > 0 {
            parts.push(format!("●{}", self.staged));
        }
        if self.unstaged > 0 {
            parts.push(format!("✚{}", self.unstaged));
        }
        if self.untracked > 0 {
            parts.push(format!("?{}", self.untracked));
        }
        if parts.is_empty() {
            "✓".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// Branch name from the trimmed output of [`CURRENT_BRANCH`].
///
/// Returns `None` for empty output and for a detached HEAD, which git
/// reports as the literal `HEAD`.
pub fn parse_branch(stdout: &str) -> Option<String> {
    let branch = stdout.trim();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch.to_string())
    }
}

/// Count changed paths in `git status --porcelain` (v1) output.
pub fn parse_status(porcelain: &str) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for line in porcelain.lines() {
        let mut chars = line.chars();
        let (Some(index), Some(worktree)) = (chars.next(), chars.next()) else {
            continue;
        };
        if index == '?' && worktree == '?' {
            counts.untracked += 1;
            continue;
        }
        if index != ' ' && index != '!' {
            counts.staged += 1;
        }
        if worktree != ' ' && worktree != '!' {
            counts.unstaged += 1;
        }
    }
    counts
}

/// Number of entries in `git stash list` output.
pub fn parse_stash_count(stdout: &str) -> usize {
    stdout.lines().filter(|line| line.starts_with("stash@{")).count()
}

/// Check a proposed branch name against git's ref naming rules.
pub fn validate_branch_name(name: &str) -> Result<(), String> {
    static INVALID: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(\.\.|@\{|//|[\x00-\x20\x7f~^:?*\[\\])").expect("valid regex")
    });

    if name.is_empty() {
        return Err("branch name is empty".to_string());
    }
    if name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return Err(format!("'{name}' cannot start with '-' or '/' or end with '/'"));
    }
    if name.ends_with('.') || name.ends_with(".lock") || name == "@" {
        return Err(format!("'{name}' has an invalid ending"));
    }
    if name.split('/').any(|part| part.starts_with('.')) {
        return Err(format!("'{name}' has a path component starting with '.'"));
    }
    if INVALID.is_match(name) {
        return Err(format!("'{name}' contains characters git does not allow"));
    }
    Ok(())
}

/// `owner/name` from a GitHub remote URL (SSH or HTTPS).
pub fn parse_github_slug(url: &str) -> Option<String> {
    static SLUG: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"github\.com[:/]([\w.-]+)/([\w.-]+?)(?:\.git)?/?$").expect("valid regex")
    });
    SLUG.captures(url.trim()).map(|caps| format!("{}/{}", &caps[1], &caps[2]))
}

/// Git operations issued through the executor.
#[derive(Debug, Clone)]
pub struct GitClient {
    executor: Executor,
    remote: String,
}

impl GitClient {
    /// Create a client pushing to `remote`.
    pub fn new(executor: Executor, remote: impl Into<String>) -> Self {
        Self { executor, remote: remote.into() }
    }

    /// Run a query; `fresh` bypasses the cache.
    pub async fn query(&self, command: &str, fresh: bool) -> CommandResult {
        let options = if fresh { ExecOptions::query().fresh() } else { ExecOptions::query() };
        self.executor.execute(command, &options).await
    }

    async fn mutate(&self, command: &str) -> Result<CommandResult, WorkflowError> {
        let result = self.executor.execute(command, &ExecOptions::mutation()).await;
        if result.is_success() {
            Ok(result)
        } else {
            Err(WorkflowError::from_result(command, &result))
        }
    }

    /// Current branch name.
    pub async fn current_branch(&self, fresh: bool) -> Result<String, WorkflowError> {
        let result = self.query(CURRENT_BRANCH, fresh).await;
        if !result.is_success() {
            return Err(WorkflowError::PreconditionFailed(format!(
                "not inside a git repository ({})",
                result.error().unwrap_or("unknown error")
            )));
        }
        parse_branch(result.output()).ok_or_else(|| {
            WorkflowError::PreconditionFailed("HEAD is detached; check out a branch".to_string())
        })
    }

    /// Change counts for the working tree.
    pub async fn status(&self, fresh: bool) -> Result<StatusCounts, WorkflowError> {
        let result = self.query(STATUS_PORCELAIN, fresh).await;
        if result.is_success() {
            Ok(parse_status(result.output()))
        } else {
            Err(WorkflowError::from_result(STATUS_PORCELAIN, &result))
        }
    }

    /// Whether the working tree has uncommitted changes.
    pub async fn is_dirty(&self, fresh: bool) -> Result<bool, WorkflowError> {
        Ok(self.status(fresh).await?.is_dirty())
    }

    /// Diff summary against HEAD; empty when unavailable.
    pub async fn diff_summary(&self) -> String {
        let result = self.query(DIFF_STAT, false).await;
        if result.is_success() {
            result.trimmed().to_string()
        } else {
            String::new()
        }
    }

    /// Subjects of commits on `branch` that are not on `base`.
    pub async fn commits_since(&self, base: &str, branch: &str) -> Vec<String> {
        let command = format!(
            "git log --format=%s {}..{}",
            quote(&format!("{}/{base}", self.remote)),
            quote(branch)
        );
        let result = self.query(&command, false).await;
        if result.is_success() {
            result.output().lines().map(str::to_string).filter(|l| !l.is_empty()).collect()
        } else {
            Vec::new()
        }
    }

    /// Number of stash entries.
    pub async fn stash_count(&self, fresh: bool) -> usize {
        let result = self.query(STASH_LIST, fresh).await;
        parse_stash_count(result.output())
    }

    /// Stage every change, including untracked files.
    pub async fn add_all(&self) -> Result<(), WorkflowError> {
        self.mutate("git add -A").await.map(|_| ())
    }

    /// Commit staged changes.
    pub async fn commit(&self, message: &str) -> Result<(), WorkflowError> {
        self.mutate(&format!("git commit -m {}", quote(message))).await.map(|_| ())
    }

    /// Stash all changes, including untracked files.
    pub async fn stash(&self, message: &str) -> Result<(), WorkflowError> {
        self.mutate(&format!("git stash push --include-untracked -m {}", quote(message)))
            .await
            .map(|_| ())
    }

    /// Create and switch to a new branch.
    pub async fn checkout_new_branch(&self, name: &str) -> Result<(), WorkflowError> {
        self.mutate(&format!("git checkout -b {}", quote(name))).await.map(|_| ())
    }

    /// Switch to an existing branch.
    pub async fn checkout(&self, name: &str) -> Result<(), WorkflowError> {
        self.mutate(&format!("git checkout {}", quote(name))).await.map(|_| ())
    }

    /// Push a branch and set its upstream.
    pub async fn push(&self, branch: &str) -> Result<(), WorkflowError> {
        let command = format!("git push -u {} {}", quote(&self.remote), quote(branch));
        let result = self
            .executor
            .execute(&command, &ExecOptions::mutation().timeout(std::time::Duration::from_secs(300)))
            .await;
        if result.is_success() {
            Ok(())
        } else {
            Err(WorkflowError::from_result(&command, &result))
        }
    }
}

/// Render a commit list as a markdown bullet list.
pub fn bullet_list(items: &[String]) -> String {
    let mut out = String::new();
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
    out
}
