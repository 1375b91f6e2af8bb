//! Read-only repository status.

use std::fmt::Write as _;

use crate::core::{run_parallel, AuthState, Operation, WorkflowContext, WorkflowError};
use crate::git::{GitClient, StatusCounts};
use crate::github::{GitHubCli, PullRequest};
use crate::hosting::HostingCli;

/// Snapshot printed by `shipline status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub branch: String,
    pub trunk: String,
    pub changes: StatusCounts,
    pub stashes: usize,
    pub github: AuthState,
    pub hosting: AuthState,
    pub pull_request: Option<PullRequest>,
}

enum Fetched {
    Branch(String),
    Changes(StatusCounts),
    Stashes(usize),
    GitHub(AuthState),
    Hosting(AuthState),
}

impl StatusReport {
    /// Gather the report; independent queries run concurrently.
    pub async fn collect(ctx: &WorkflowContext) -> Result<Self, WorkflowError> {
        let git = GitClient::new(ctx.executor.clone(), ctx.config.git.remote.clone());
        let github = GitHubCli::new(ctx.executor.clone());
        let hosting = HostingCli::new(
            ctx.executor.clone(),
            ctx.config.deploy.clone(),
            ctx.config.executor.deploy_timeout(),
        );

        let operations: Vec<Operation<'_, Fetched, WorkflowError>> = vec![
            Box::pin(async { git.current_branch(false).await.map(Fetched::Branch) }),
            Box::pin(async { git.status(false).await.map(Fetched::Changes) }),
            Box::pin(async { Ok::<_, WorkflowError>(Fetched::Stashes(git.stash_count(false).await)) }),
            Box::pin(async { Ok::<_, WorkflowError>(Fetched::GitHub(github.auth_status().await)) }),
            Box::pin(async { Ok::<_, WorkflowError>(Fetched::Hosting(hosting.auth_status().await)) }),
        ];

        let mut report = Self {
            branch: String::new(),
            trunk: ctx.config.git.trunk.clone(),
            changes: StatusCounts::default(),
            stashes: 0,
            github: AuthState::LoggedOut,
            hosting: AuthState::LoggedOut,
            pull_request: None,
        };
        for fetched in run_parallel(operations, "status").await? {
            match fetched {
                Fetched::Branch(branch) => report.branch = branch,
                Fetched::Changes(changes) => report.changes = changes,
                Fetched::Stashes(count) => report.stashes = count,
                Fetched::GitHub(state) => report.github = state,
                Fetched::Hosting(state) => report.hosting = state,
            }
        }

        if report.github.is_logged_in() && report.branch != report.trunk {
            match github.find_pull_request(&report.branch, &report.trunk).await {
                Ok(pr) => report.pull_request = pr,
                Err(e) => tracing::debug!(error = %e, "Pull request lookup failed"),
            }
        }
        Ok(report)
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Branch:   {} ({})", self.branch, self.changes.status_string());
        if self.stashes > 0 {
            let _ = writeln!(out, "Stashes:  {}", self.stashes);
        }
        let _ = writeln!(out, "GitHub:   {}", self.github.describe());
        let _ = writeln!(out, "Hosting:  {}", self.hosting.describe());
        match &self.pull_request {
            Some(pr) => {
                let _ = writeln!(out, "PR:       #{} {}", pr.number, pr.url);
            }
            None if self.branch == self.trunk => {}
            None => {
                let _ = writeln!(out, "PR:       none into {}", self.trunk);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::core::mock::ScriptedSpawner;
    use crate::core::{CommandResult, Config};

    #[tokio::test]
    async fn test_collect_status() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on("git rev-parse --abbrev-ref HEAD", CommandResult::success("feature/x\n"));
        spawner.on("git status --porcelain", CommandResult::success(" M a.rs\n?? b.rs\n"));
        spawner.on("git stash list", CommandResult::success("stash@{0}: On main: wip\n"));
        spawner.on("gh auth status", CommandResult::success("Logged in to github.com account octocat"));
        spawner.on(
            "gh pr list",
            CommandResult::success(r#"[{"number":7,"url":"https://github.com/acme/web/pull/7","title":"x"}]"#),
        );
        let ctx =
            WorkflowContext::with_spawner("status", Path::new("/repo"), Config::default(), spawner.clone())
                .quiet();

        let report = StatusReport::collect(&ctx).await.unwrap();
        assert_eq!(report.branch, "feature/x");
        assert_eq!(report.changes.unstaged, 1);
        assert_eq!(report.stashes, 1);
        assert_eq!(report.pull_request.as_ref().map(|pr| pr.number), Some(7));
        assert!(report.hosting.is_logged_in());

        let text = report.render();
        assert!(text.contains("Branch:   feature/x (✚1 ?1)"));
        assert!(text.contains("PR:       #7"));
        assert_eq!(spawner.count("git rev-parse"), 1);
    }

    #[tokio::test]
    async fn test_status_outside_repository() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on(
            "git rev-parse",
            CommandResult::failure("", "fatal: not a git repository", Some(128)),
        );
        let ctx =
            WorkflowContext::with_spawner("status", Path::new("/tmp"), Config::default(), spawner).quiet();
        assert!(matches!(
            StatusReport::collect(&ctx).await,
            Err(WorkflowError::PreconditionFailed(_))
        ));
    }
}
