//! The release workflow state machine.
//!
//! Runs the fixed step sequence
//! `branch_setup -> code_changes -> repo_hygiene -> preview_deploy ->
//! pull_request -> completion`, one step at a time, asking the operator at
//! the few decision points. `completion` runs on every path.

use std::time::Instant;

use crate::core::{
    run_parallel, AuthState, ExecOptions, IdempotentPolicy, Operation, Reconciled, WorkflowContext,
    WorkflowError,
};
use crate::git::{bullet_list, validate_branch_name, GitClient};
use crate::github::{GitHubCli, PrRequest, PullRequest, PullRequestMutation};
use crate::hosting::{channel_id_for_branch, recover_preview_urls, HostingCli};
use crate::prompt::Prompter;

use super::hygiene::run_hygiene;
use super::summary::{PullRequestSummary, RunSummary};

pub const BRANCH_SETUP: &str = "branch_setup";
pub const CODE_CHANGES: &str = "code_changes";
pub const REPO_HYGIENE: &str = "repo_hygiene";
pub const PREVIEW_DEPLOY: &str = "preview_deploy";
pub const PULL_REQUEST: &str = "pull_request";
pub const COMPLETION: &str = "completion";

/// Declared steps, in execution order.
pub const STEPS: &[(&str, &str)] = &[
    (BRANCH_SETUP, "Prepare feature branch"),
    (CODE_CHANGES, "Commit code changes"),
    (REPO_HYGIENE, "Clean up repository"),
    (PREVIEW_DEPLOY, "Deploy preview channel"),
    (PULL_REQUEST, "Open pull request"),
    (COMPLETION, "Summarize run"),
];

const DIRTY_CHOICES: &[&str] = &["commit", "stash", "cancel"];

/// Per-run switches, usually from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Feature branch to create when starting on trunk
    pub branch: Option<String>,
    /// Commit message for pending changes
    pub message: Option<String>,
    /// Run the preview deploy step
    pub deploy: bool,
    /// Run the pull request step
    pub pull_request: bool,
    /// Answer every question with its default
    pub assume_yes: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { branch: None, message: None, deploy: true, pull_request: true, assume_yes: false }
    }
}

/// How a step ended when it did not end the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded(String),
    Skipped(String),
    /// The step failed but the run continues
    FailedNonFatal(String),
}

/// State gathered in parallel before the first step.
#[derive(Debug, Clone)]
struct Snapshot {
    branch: String,
    dirty: bool,
    github: Option<AuthState>,
    hosting: Option<AuthState>,
}

enum Prefetched {
    Branch(String),
    Dirty(bool),
    GitHub(AuthState),
    Hosting(AuthState),
}

/// Drives one workflow run.
pub struct WorkflowDriver {
    ctx: WorkflowContext,
    prompter: Box<dyn Prompter>,
    options: RunOptions,
    git: GitClient,
    github: GitHubCli,
    hosting: HostingCli,
    branch: Option<String>,
    commit_confirmed: bool,
    preview_urls: Vec<String>,
    pull_request: Option<Reconciled<PullRequest>>,
    warnings: Vec<String>,
}

impl WorkflowDriver {
    /// Create a driver over a prepared context.
    pub fn new(ctx: WorkflowContext, prompter: Box<dyn Prompter>, options: RunOptions) -> Self {
        let executor = ctx.executor.clone();
        let git = GitClient::new(executor.clone(), ctx.config.git.remote.clone());
        let github = GitHubCli::new(executor.clone());
        let hosting = HostingCli::new(
            executor,
            ctx.config.deploy.clone(),
            ctx.config.executor.deploy_timeout(),
        );
        Self {
            ctx,
            prompter,
            options,
            git,
            github,
            hosting,
            branch: None,
            commit_confirmed: false,
            preview_urls: Vec::new(),
            pull_request: None,
            warnings: Vec::new(),
        }
    }

    fn deploy_enabled(&self) -> bool {
        self.options.deploy && self.ctx.config.deploy.enabled
    }

    /// Run every step and report the outcome.
    ///
    /// Never returns an error: failures end up in the summary.
    pub async fn run(mut self) -> RunSummary {
        self.ctx.progress.init_progress("Shipline", STEPS);
        let outcome = self.run_stages().await;
        if let Err(e) = &outcome {
            if e.is_abort() {
                tracing::info!(reason = %e, "Workflow aborted by operator");
            } else {
                tracing::error!(error = %e, "Workflow failed");
            }
        }
        self.complete(outcome.err())
    }

    async fn run_stages(&mut self) -> Result<(), WorkflowError> {
        let snapshot = self.prefetch().await?;

        let started = self.begin(BRANCH_SETUP)?;
        let outcome = self.branch_setup(&snapshot).await;
        self.settle(BRANCH_SETUP, started, outcome)?;

        let started = self.begin(CODE_CHANGES)?;
        let outcome = self.code_changes().await;
        self.settle(CODE_CHANGES, started, outcome)?;

        let started = self.begin(REPO_HYGIENE)?;
        let outcome = self.repo_hygiene().await;
        self.settle(REPO_HYGIENE, started, outcome)?;

        if self.deploy_enabled() {
            let started = self.begin(PREVIEW_DEPLOY)?;
            let outcome = self.preview_deploy(&snapshot).await;
            self.settle(PREVIEW_DEPLOY, started, outcome)?;
        } else {
            self.ctx.progress.skip_step(PREVIEW_DEPLOY, "disabled")?;
        }

        if self.options.pull_request {
            let started = self.begin(PULL_REQUEST)?;
            let outcome = self.open_pull_request(&snapshot).await;
            self.settle(PULL_REQUEST, started, outcome)?;
        } else {
            self.ctx.progress.skip_step(PULL_REQUEST, "disabled")?;
        }

        Ok(())
    }

    async fn prefetch(&self) -> Result<Snapshot, WorkflowError> {
        let git = &self.git;
        let github = &self.github;
        let hosting = &self.hosting;

        let mut operations: Vec<Operation<'_, Prefetched, WorkflowError>> = vec![
            Box::pin(async move { git.current_branch(false).await.map(Prefetched::Branch) }),
            Box::pin(async move { git.is_dirty(false).await.map(Prefetched::Dirty) }),
        ];
        if self.options.pull_request {
            operations.push(Box::pin(async move {
                Ok::<_, WorkflowError>(Prefetched::GitHub(github.auth_status().await))
            }));
        }
        if self.deploy_enabled() {
            operations.push(Box::pin(async move {
                Ok::<_, WorkflowError>(Prefetched::Hosting(hosting.auth_status().await))
            }));
        }

        let mut snapshot =
            Snapshot { branch: String::new(), dirty: false, github: None, hosting: None };
        for value in run_parallel(operations, "prefetch").await? {
            match value {
                Prefetched::Branch(branch) => snapshot.branch = branch,
                Prefetched::Dirty(dirty) => snapshot.dirty = dirty,
                Prefetched::GitHub(state) => snapshot.github = Some(state),
                Prefetched::Hosting(state) => snapshot.hosting = Some(state),
            }
        }
        tracing::debug!(branch = %snapshot.branch, dirty = snapshot.dirty, "Prefetched repository state");
        Ok(snapshot)
    }

    fn begin(&mut self, name: &str) -> Result<Instant, WorkflowError> {
        self.ctx.progress.start_step(name)?;
        Ok(Instant::now())
    }

    fn settle(
        &mut self,
        name: &str,
        started: Instant,
        outcome: Result<StageOutcome, WorkflowError>,
    ) -> Result<(), WorkflowError> {
        self.ctx.state.record_duration(&format!("step.{name}"), started.elapsed());
        match outcome {
            Ok(StageOutcome::Succeeded(message)) => {
                self.ctx.progress.complete_step(true, &message)?;
                Ok(())
            }
            Ok(StageOutcome::Skipped(reason)) => {
                self.ctx.progress.skip_current(&reason)?;
                Ok(())
            }
            Ok(StageOutcome::FailedNonFatal(message)) => {
                self.warnings.push(message.clone());
                self.ctx.progress.complete_step(false, &message)?;
                Ok(())
            }
            Err(e) => {
                self.ctx.progress.complete_step(false, &e.to_string())?;
                Err(e)
            }
        }
    }

    fn current_branch(&self) -> Result<&str, WorkflowError> {
        self.branch
            .as_deref()
            .ok_or_else(|| WorkflowError::PreconditionFailed("no feature branch selected".into()))
    }

    async fn branch_setup(&mut self, snapshot: &Snapshot) -> Result<StageOutcome, WorkflowError> {
        let trunk = self.ctx.config.git.trunk.clone();
        let requested = self.options.branch.clone().filter(|b| *b != snapshot.branch);

        if snapshot.branch != trunk && requested.is_none() {
            self.branch = Some(snapshot.branch.clone());
            return Ok(StageOutcome::Succeeded(format!("on {}", snapshot.branch)));
        }

        let name = match requested {
            Some(name) => {
                validate_branch_name(&name).map_err(WorkflowError::PreconditionFailed)?;
                name
            }
            None => self.ask_branch_name()?,
        };
        if name == trunk {
            return Err(WorkflowError::PreconditionFailed(format!(
                "feature branch must differ from {trunk}"
            )));
        }

        let mut stashed = false;
        if snapshot.dirty {
            let choice = if self.options.assume_yes {
                0
            } else {
                self.prompter.choose(
                    &format!("You have uncommitted changes on {}. What should happen to them?", snapshot.branch),
                    DIRTY_CHOICES,
                )?
            };
            match DIRTY_CHOICES[choice] {
                "commit" => self.commit_confirmed = true,
                "stash" => {
                    self.git
                        .stash(&format!("shipline: changes from {} before {name}", snapshot.branch))
                        .await?;
                    stashed = true;
                    self.warnings
                        .push("Changes were stashed; run `git stash pop` to restore them".into());
                }
                _ => {
                    return Err(WorkflowError::OperatorAborted(
                        "cancelled with uncommitted changes".into(),
                    ))
                }
            }
        }

        let message = match self.git.checkout_new_branch(&name).await {
            Ok(()) => format!("created {name}"),
            Err(WorkflowError::ExternalCommand { message, .. }) if message.contains("already exists") => {
                self.git.checkout(&name).await?;
                format!("switched to existing {name}")
            }
            Err(e) => return Err(e),
        };
        self.branch = Some(name);
        Ok(StageOutcome::Succeeded(if stashed { format!("{message}, changes stashed") } else { message }))
    }

    fn ask_branch_name(&self) -> Result<String, WorkflowError> {
        if self.options.assume_yes {
            return Err(WorkflowError::PreconditionFailed(
                "on the trunk branch; pass --branch to name the feature branch".into(),
            ));
        }
        let mut question = "Feature branch name".to_string();
        loop {
            let name = self.prompter.ask(&question, None)?;
            match validate_branch_name(name.trim()) {
                Ok(()) => return Ok(name.trim().to_string()),
                Err(reason) => question = format!("Invalid branch name ({reason}). Feature branch name"),
            }
        }
    }

    async fn code_changes(&mut self) -> Result<StageOutcome, WorkflowError> {
        let branch = self.current_branch()?.to_string();
        let dirty = self.git.is_dirty(true).await?;

        let outcome = if !dirty {
            StageOutcome::Skipped("working tree clean".into())
        } else if self.commit_confirmed
            || self.options.message.is_some()
            || self.confirm_commit(&branch).await?
        {
            let message = match self.options.message.clone() {
                Some(message) => message,
                None => self.prompter.ask("Commit message", Some(&format!("Update {branch}")))?,
            };
            self.git.add_all().await?;
            self.git.commit(&message).await?;
            StageOutcome::Succeeded(format!("committed \"{message}\""))
        } else {
            tracing::warn!(branch = %branch, "Continuing with uncommitted changes");
            self.warnings.push("Uncommitted changes were left in the working tree".into());
            StageOutcome::Skipped("changes left uncommitted".into())
        };

        if self.ctx.config.git.push {
            self.git.push(&branch).await?;
        }
        Ok(outcome)
    }

    async fn confirm_commit(&self, branch: &str) -> Result<bool, WorkflowError> {
        let diff = self.git.diff_summary().await;
        let question = if diff.is_empty() {
            format!("Commit all changes on {branch}?")
        } else {
            format!("{diff}\nCommit all changes on {branch}?")
        };
        Ok(self.prompter.confirm(&question, true)?)
    }

    async fn repo_hygiene(&mut self) -> Result<StageOutcome, WorkflowError> {
        match run_hygiene(&self.ctx.root, &self.ctx.config.hygiene).await {
            Ok(report) => Ok(StageOutcome::Succeeded(report.describe())),
            Err(e) => Ok(StageOutcome::FailedNonFatal(format!("hygiene failed: {e}"))),
        }
    }

    async fn preview_deploy(&mut self, snapshot: &Snapshot) -> Result<StageOutcome, WorkflowError> {
        let branch = self.current_branch()?.to_string();
        let channel = channel_id_for_branch(&self.ctx.config.deploy.channel_prefix, &branch);
        let report_dir = self.ctx.report_dir();

        let failure = match self.run_checks().await {
            Err(e) => e,
            Ok(()) if matches!(snapshot.hosting, Some(AuthState::LoggedOut)) => {
                WorkflowError::auth(crate::hosting::TOOL, "firebase login")
            }
            Ok(()) => {
                let result = self.hosting.deploy_channel(&channel).await;
                if let Some(report) = self.hosting.report_for(&channel, &result) {
                    if let Err(e) = report.write(&report_dir) {
                        tracing::warn!(error = %e, "Could not write deploy report");
                    }
                    self.preview_urls = report.urls;
                    self.ctx.state.add("preview.urls", self.preview_urls.len() as u64);
                    return Ok(StageOutcome::Succeeded(format!("deployed to {channel}")));
                }

                let recovered = recover_preview_urls(&report_dir, &channel, &result.combined());
                if !recovered.is_empty() {
                    tracing::warn!(channel = %channel, count = recovered.len(), "Deploy reported failure; using recovered URLs");
                    self.warnings
                        .push(format!("Deploy reported a failure; recovered {} preview URL(s)", recovered.len()));
                    self.preview_urls = recovered;
                    self.ctx.state.add("preview.urls", self.preview_urls.len() as u64);
                    return Ok(StageOutcome::Succeeded(format!("recovered URLs for {channel}")));
                }
                let command = format!("firebase hosting:channel:deploy {channel}");
                if result.is_success() {
                    WorkflowError::ExternalCommand { command, message: "no preview URL in deploy output".into() }
                } else {
                    self.hosting.failure(&command, &result)
                }
            }
        };

        let carry_on = self
            .prompter
            .confirm(&format!("Preview deploy failed ({failure}). Continue without a preview?"), false)?;
        if carry_on {
            Ok(StageOutcome::FailedNonFatal(failure.to_string()))
        } else {
            Err(failure)
        }
    }

    async fn run_checks(&self) -> Result<(), WorkflowError> {
        let timeout = self.ctx.config.executor.deploy_timeout();
        for check in &self.ctx.config.deploy.checks {
            let result = self
                .ctx
                .executor
                .execute(check, &ExecOptions::mutation().ignore_error().timeout(timeout))
                .await;
            if !result.is_success() {
                return Err(WorkflowError::from_result(check, &result));
            }
        }
        Ok(())
    }

    async fn open_pull_request(&mut self, snapshot: &Snapshot) -> Result<StageOutcome, WorkflowError> {
        if matches!(snapshot.github, Some(AuthState::LoggedOut)) {
            return Err(WorkflowError::auth(crate::github::TOOL, "gh auth login"));
        }
        let head = self.current_branch()?.to_string();
        let base = self.ctx.config.git.trunk.clone();
        if head == base {
            return Err(WorkflowError::PreconditionFailed(format!(
                "cannot open a pull request from {base} into itself"
            )));
        }

        let mut body = bullet_list(&self.git.commits_since(&base, &head).await);
        if !self.preview_urls.is_empty() {
            body.push_str("\nPreview:\n");
            body.push_str(&bullet_list(&self.preview_urls));
        }
        let settings = &self.ctx.config.pull_request;
        let request = PrRequest {
            head: head.clone(),
            base,
            title: settings.title_for(&head),
            body,
            draft: settings.draft,
            labels: settings.labels.clone(),
        };

        let policy = IdempotentPolicy::from(&self.ctx.config.retry);
        let reconciled = policy.apply(&PullRequestMutation::new(&self.github, request)).await?;
        self.ctx.state.add("pull_request.attempts", u64::from(reconciled.attempts));

        let message = if reconciled.already_exists {
            format!("updated existing #{} {}", reconciled.value.number, reconciled.value.url)
        } else {
            format!("opened #{} {}", reconciled.value.number, reconciled.value.url)
        };
        self.pull_request = Some(reconciled);
        Ok(StageOutcome::Succeeded(message))
    }

    fn complete(mut self, error: Option<WorkflowError>) -> RunSummary {
        let started = Instant::now();
        let _ = self.ctx.progress.start_step(COMPLETION);
        self.ctx.teardown();

        let success = error.is_none();
        match &error {
            None => self.ctx.state.complete(),
            Some(e) => self.ctx.state.fail(e.to_string()),
        };
        self.ctx.state.record_duration(&format!("step.{COMPLETION}"), started.elapsed());

        let _ = self.ctx.progress.complete_step(true, "");
        let message = match &error {
            None => "done".to_string(),
            Some(e) => e.to_string(),
        };
        let _ = self.ctx.progress.finish_progress(success, &message);

        let mut summary = RunSummary::from_state(&self.ctx.state, self.ctx.progress.steps(), error.as_ref());
        summary.branch = self.branch.take();
        summary.preview_urls = std::mem::take(&mut self.preview_urls);
        summary.pull_request = self
            .pull_request
            .as_ref()
            .map(|pr| PullRequestSummary::new(&pr.value, pr.already_exists));
        summary.warnings = std::mem::take(&mut self.warnings);

        match summary.write(&self.ctx.report_dir()) {
            Ok(path) => tracing::debug!(path = %path.display(), "Wrote run summary"),
            Err(e) => tracing::warn!(error = %e, "Could not write run summary"),
        }
        summary
    }
}
