//! GitHub integration through the `gh` CLI.
//!
//! Provides pull request lookup, creation and editing, plus the
//! [`Reconcilable`] wrapper that makes pull request creation idempotent.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{
    quote, AttemptError, AuthState, CommandResult, ExecOptions, Executor, MutationError, Reconcilable,
};

/// Tool name used in errors and remediation hints.
pub const TOOL: &str = "gh";

/// Query reporting the login state.
pub const AUTH_STATUS: &str = "gh auth status";

/// A pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request number
    pub number: u64,
    /// HTML URL
    pub url: String,
    /// Title
    #[serde(default)]
    pub title: String,
}

/// Options for creating a pull request.
#[derive(Debug, Clone, Default)]
pub struct PrRequest {
    /// Source branch
    pub head: String,
    /// Target branch
    pub base: String,
    /// Title (required)
    pub title: String,
    /// Body/description
    pub body: String,
    /// Open as a draft
    pub draft: bool,
    /// Labels to add
    pub labels: Vec<String>,
}

/// Interpret the result of [`AUTH_STATUS`].
///
/// `gh` prints its status on stderr and exits non-zero when logged out.
pub fn parse_auth_status(result: &CommandResult) -> AuthState {
    static ACCOUNT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?:Logged in to \S+ (?:account|as) )(\S+)").expect("valid regex")
    });

    let text = result.combined();
    if result.is_success() || text.contains("Logged in to") {
        let account = ACCOUNT
            .captures(&text)
            .map(|caps| caps[1].trim_matches(|c| c == '(' || c == ')').to_string());
        return AuthState::LoggedIn(account);
    }
    if is_auth_failure(&text) {
        AuthState::LoggedOut
    } else {
        AuthState::Unavailable(result.error().unwrap_or("unknown error").to_string())
    }
}

/// Whether failure text says the operator must log in.
pub fn is_auth_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("not logged in")
        || lower.contains("gh auth login")
        || lower.contains("authentication required")
        || lower.contains("http 401")
}

/// Whether failure text says the pull request can never be created as asked.
pub fn is_precondition_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("must first push")
        || lower.contains("no commits between")
        || lower.contains("head sha can't be blank")
        || lower.contains("could not find any commits")
        || lower.contains("base ref must be a branch")
}

/// Whether failure text says a pull request for the branch pair exists.
pub fn is_existing_pr_conflict(text: &str) -> bool {
    text.to_lowercase().contains("already exists")
}

/// Pull request URL and number from `gh pr create` output or an error.
pub fn parse_pr_url(text: &str) -> Option<PullRequest> {
    static URL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"https://\S+/pull/(\d+)").expect("valid regex"));

    let caps = URL.captures(text)?;
    let number = caps[1].parse().ok()?;
    Some(PullRequest { number, url: caps[0].to_string(), title: String::new() })
}

/// First entry of `gh pr list --json` output.
pub fn parse_pr_list(json: &str) -> anyhow::Result<Option<PullRequest>> {
    let list: Vec<PullRequest> = serde_json::from_str(json.trim())?;
    Ok(list.into_iter().next())
}

/// `gh` operations issued through the executor.
#[derive(Debug, Clone)]
pub struct GitHubCli {
    executor: Executor,
}

impl GitHubCli {
    /// Create a client.
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Current login state.
    pub async fn auth_status(&self) -> AuthState {
        let result = self.executor.execute(AUTH_STATUS, &ExecOptions::query()).await;
        parse_auth_status(&result)
    }

    /// Open pull request from `head` into `base`, if any.
    pub async fn find_pull_request(
        &self,
        head: &str,
        base: &str,
    ) -> anyhow::Result<Option<PullRequest>> {
        let command = format!(
            "gh pr list --head {} --base {} --state open --json number,url,title --limit 1",
            quote(head),
            quote(base)
        );
        let result = self.executor.execute(&command, &ExecOptions::query().fresh()).await;
        if !result.is_success() {
            anyhow::bail!("{}", result.error().unwrap_or("pull request lookup failed"));
        }
        parse_pr_list(result.output())
    }

    /// Create a pull request once.
    pub async fn create_pull_request(&self, request: &PrRequest) -> Result<PullRequest, AttemptError> {
        let mut command = format!(
            "gh pr create --head {} --base {} --title {} --body {}",
            quote(&request.head),
            quote(&request.base),
            quote(&request.title),
            quote(&request.body)
        );
        if request.draft {
            command.push_str(" --draft");
        }
        for label in &request.labels {
            command.push_str(&format!(" --label {}", quote(label)));
        }

        let result = self.executor.execute(&command, &ExecOptions::mutation().ignore_error()).await;
        if result.is_success() {
            return parse_pr_url(result.output())
                .map(|pr| PullRequest { title: request.title.clone(), ..pr })
                .ok_or_else(|| {
                    AttemptError::Retryable(format!(
                        "could not find a pull request URL in: {}",
                        result.trimmed()
                    ))
                });
        }
        Err(classify_failure(&result))
    }

    /// Update title and body of an existing pull request.
    pub async fn edit_pull_request(
        &self,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<(), MutationError> {
        let command =
            format!("gh pr edit {number} --title {} --body {}", quote(title), quote(body));
        let result = self.executor.execute(&command, &ExecOptions::mutation()).await;
        if result.is_success() {
            Ok(())
        } else {
            match classify_failure(&result) {
                AttemptError::Fatal(err) => Err(err),
                AttemptError::Retryable(message) => Err(MutationError::Exhausted {
                    action: format!("edit pull request #{number}"),
                    attempts: 1,
                    last_error: message,
                }),
            }
        }
    }

    /// Squash-merge a pull request and delete its branch.
    pub async fn merge_pull_request(&self, number: u64) -> Result<(), MutationError> {
        let command = format!("gh pr merge {number} --squash --delete-branch");
        let result = self.executor.execute(&command, &ExecOptions::mutation()).await;
        if result.is_success() {
            return Ok(());
        }
        match classify_failure(&result) {
            AttemptError::Fatal(err) => Err(err),
            AttemptError::Retryable(message) => Err(MutationError::PreconditionFailed(message)),
        }
    }
}

fn classify_failure(result: &CommandResult) -> AttemptError {
    let text = result.combined();
    if is_auth_failure(&text) {
        AttemptError::Fatal(MutationError::AuthenticationRequired {
            tool: TOOL.to_string(),
            detail: result.error().unwrap_or_default().to_string(),
        })
    } else if is_precondition_failure(&text) {
        AttemptError::Fatal(MutationError::PreconditionFailed(
            result.error().unwrap_or_default().to_string(),
        ))
    } else {
        AttemptError::Retryable(text)
    }
}

/// Idempotent pull request creation for one branch pair.
pub struct PullRequestMutation<'a> {
    cli: &'a GitHubCli,
    request: PrRequest,
}

impl<'a> PullRequestMutation<'a> {
    /// Wrap a create request.
    pub fn new(cli: &'a GitHubCli, request: PrRequest) -> Self {
        Self { cli, request }
    }
}

#[async_trait]
impl<'a> Reconcilable for PullRequestMutation<'a> {
    type Output = PullRequest;

    fn action(&self) -> String {
        format!("create pull request {} -> {}", self.request.head, self.request.base)
    }

    async fn find_existing(&self) -> anyhow::Result<Option<PullRequest>> {
        self.cli.find_pull_request(&self.request.head, &self.request.base).await
    }

    async fn create(&self) -> Result<PullRequest, AttemptError> {
        self.cli.create_pull_request(&self.request).await
    }

    fn is_conflict(&self, message: &str) -> bool {
        is_existing_pr_conflict(message)
    }

    async fn reconcile(&self, existing: PullRequest) -> Result<PullRequest, MutationError> {
        // An edit failure leaves a usable pull request behind.
        if let Err(e) =
            self.cli.edit_pull_request(existing.number, &self.request.title, &self.request.body).await
        {
            tracing::warn!(number = existing.number, error = %e, "Could not update existing pull request");
            return Ok(existing);
        }
        Ok(PullRequest { title: self.request.title.clone(), ..existing })
    }

    fn existing_from_conflict(&self, message: &str) -> Option<PullRequest> {
        parse_pr_url(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::core::mock::ScriptedSpawner;
    use crate::core::IdempotentPolicy;

    fn request() -> PrRequest {
        PrRequest {
            head: "feature/x".into(),
            base: "main".into(),
            title: "feature/x".into(),
            body: "- add x".into(),
            ..Default::default()
        }
    }

    fn quick_policy() -> IdempotentPolicy {
        IdempotentPolicy { max_attempts: 3, retry_delay: Duration::from_millis(1) }
    }

    #[test]
    fn test_parse_auth_status() {
        let ok = CommandResult::success(
            "github.com\n  ✓ Logged in to github.com account octocat (keyring)\n",
        );
        assert_eq!(parse_auth_status(&ok), AuthState::LoggedIn(Some("octocat".into())));

        let out = CommandResult::failure(
            "",
            "You are not logged into any GitHub hosts. To log in, run: gh auth login",
            Some(1),
        );
        assert_eq!(parse_auth_status(&out), AuthState::LoggedOut);

        let missing = CommandResult::failure("", "sh: 1: gh: not found", Some(127));
        assert!(matches!(parse_auth_status(&missing), AuthState::Unavailable(_)));
    }

    #[test]
    fn test_parse_pr_url() {
        let pr = parse_pr_url("https://github.com/acme/web/pull/42\n").unwrap();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.url, "https://github.com/acme/web/pull/42");

        let conflict = "a pull request for branch \"feature/x\" into branch \"main\" already exists:\nhttps://github.com/acme/web/pull/7";
        assert_eq!(parse_pr_url(conflict).unwrap().number, 7);
        assert!(parse_pr_url("no url here").is_none());
    }

    #[test]
    fn test_parse_pr_list() {
        let json = r#"[{"number":7,"url":"https://github.com/acme/web/pull/7","title":"feature/x"}]"#;
        assert_eq!(parse_pr_list(json).unwrap().unwrap().number, 7);
        assert!(parse_pr_list("[]").unwrap().is_none());
        assert!(parse_pr_list("not json").is_err());
    }

    #[test]
    fn test_failure_classification() {
        let auth = CommandResult::failure("", "HTTP 401: Bad credentials", Some(1));
        assert!(matches!(
            classify_failure(&auth),
            AttemptError::Fatal(MutationError::AuthenticationRequired { .. })
        ));

        let pre = CommandResult::failure("", "No commits between main and feature/x", Some(1));
        assert!(matches!(
            classify_failure(&pre),
            AttemptError::Fatal(MutationError::PreconditionFailed(_))
        ));

        let flaky = CommandResult::failure("", "HTTP 502: Bad Gateway", Some(1));
        assert!(matches!(classify_failure(&flaky), AttemptError::Retryable(_)));
    }

    #[tokio::test]
    async fn test_existing_pr_skips_create() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on(
            "gh pr list",
            CommandResult::success(r#"[{"number":7,"url":"https://github.com/acme/web/pull/7","title":"old"}]"#),
        );
        let cli = GitHubCli::new(Executor::with_spawner(spawner.clone()));

        let outcome = quick_policy().apply(&PullRequestMutation::new(&cli, request())).await.unwrap();
        assert!(outcome.already_exists);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.value.number, 7);
        assert_eq!(outcome.value.title, "feature/x");
        assert!(!spawner.ran("gh pr create"));
        assert!(spawner.ran("gh pr edit 7"));
    }

    #[tokio::test]
    async fn test_conflict_after_failed_precheck_reconciles() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on("gh pr list", CommandResult::failure("", "HTTP 502", Some(1)));
        spawner.on(
            "gh pr create",
            CommandResult::failure(
                "",
                "a pull request for branch \"feature/x\" into branch \"main\" already exists:\nhttps://github.com/acme/web/pull/9",
                Some(1),
            ),
        );
        let cli = GitHubCli::new(Executor::with_spawner(spawner.clone()));

        let outcome = quick_policy().apply(&PullRequestMutation::new(&cli, request())).await.unwrap();
        assert!(outcome.already_exists);
        assert_eq!(outcome.value.number, 9);
        assert_eq!(spawner.count("gh pr create"), 1);
    }

    #[tokio::test]
    async fn test_creating_twice_yields_one_pull_request() {
        let spawner = Arc::new(ScriptedSpawner::new());
        let created: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));

        let listed = created.clone();
        spawner.on_with("gh pr list", move |_| match *listed.lock() {
            Some(n) => CommandResult::success(format!(
                r#"[{{"number":{n},"url":"https://github.com/acme/web/pull/{n}","title":"feature/x"}}]"#
            )),
            None => CommandResult::success("[]"),
        });
        let store = created.clone();
        spawner.on_with("gh pr create", move |_| {
            let mut slot = store.lock();
            if slot.is_some() {
                return CommandResult::failure("", "pull request already exists", Some(1));
            }
            *slot = Some(12);
            CommandResult::success("https://github.com/acme/web/pull/12\n")
        });
        let cli = GitHubCli::new(Executor::with_spawner(spawner.clone()));
        let policy = quick_policy();

        let first = policy.apply(&PullRequestMutation::new(&cli, request())).await.unwrap();
        let second = policy.apply(&PullRequestMutation::new(&cli, request())).await.unwrap();

        assert!(!first.already_exists);
        assert!(second.already_exists);
        assert_eq!(first.value.number, second.value.number);
        assert_eq!(spawner.count("gh pr create"), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on("gh pr list", CommandResult::success("[]"));
        spawner.on(
            "gh pr create",
            CommandResult::failure("", "To get started with GitHub CLI, please run:  gh auth login", Some(4)),
        );
        let cli = GitHubCli::new(Executor::with_spawner(spawner.clone()));

        let err = quick_policy().apply(&PullRequestMutation::new(&cli, request())).await.unwrap_err();
        assert!(matches!(err, MutationError::AuthenticationRequired { .. }));
        assert_eq!(spawner.count("gh pr create"), 1);
    }

    #[tokio::test]
    async fn test_create_command_flags() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on("gh pr create", CommandResult::success("https://github.com/acme/web/pull/3"));
        let cli = GitHubCli::new(Executor::with_spawner(spawner.clone()));

        let req = PrRequest { draft: true, labels: vec!["preview".into()], ..request() };
        let pr = cli.create_pull_request(&req).await.unwrap();
        assert_eq!(pr.number, 3);

        let call = spawner.calls().pop().unwrap();
        assert!(call.contains("--head feature/x --base main"));
        assert!(call.ends_with("--draft --label preview"));
    }

    #[tokio::test]
    async fn test_merge_pull_request() {
        let spawner = Arc::new(ScriptedSpawner::new());
        let cli = GitHubCli::new(Executor::with_spawner(spawner.clone()));
        cli.merge_pull_request(12).await.unwrap();
        assert_eq!(spawner.calls(), vec!["gh pr merge 12 --squash --delete-branch".to_string()]);

        spawner.on("gh pr merge", CommandResult::failure("", "Pull request is not mergeable", Some(1)));
        assert!(matches!(
            cli.merge_pull_request(12).await,
            Err(MutationError::PreconditionFailed(_))
        ));
    }
}
