//! Preview hosting through the `firebase` CLI.
//!
//! Deploys a branch to a temporary preview channel, lists and deletes
//! channels, and extracts preview URLs from whatever the CLI prints.

mod report;

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    quote, AuthState, CommandResult, DeploySettings, ExecOptions, Executor, WorkflowError,
};

pub use report::{is_preview_url, recover_preview_urls, DeployReport, REPORT_FILE};

/// Tool name used in errors and remediation hints.
pub const TOOL: &str = "firebase";

/// Query listing the authorized accounts.
pub const LOGIN_LIST: &str = "firebase login:list";

/// Longest channel id we generate.
pub const MAX_CHANNEL_LEN: usize = 40;

/// A hosting preview channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id (last segment of the resource name)
    pub id: String,
    /// Preview URL
    pub url: Option<String>,
    /// Expiry timestamp, if the channel expires
    pub expires_at: Option<String>,
}

/// Preview channel id for a branch.
///
/// Lowercases, maps anything outside `[a-z0-9-]` to `-`, collapses runs of
/// `-`, prepends `prefix` and cuts the result to [`MAX_CHANNEL_LEN`].
pub fn channel_id_for_branch(prefix: &str, branch: &str) -> String {
    let mut id = String::with_capacity(prefix.len() + branch.len());
    for c in prefix.chars().chain(branch.chars()) {
        let c = c.to_ascii_lowercase();
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if c == '-' && (id.is_empty() || id.ends_with('-')) {
            continue;
        }
        id.push(c);
    }
    id.truncate(MAX_CHANNEL_LEN);
    let id = id.trim_end_matches('-');
    if id.is_empty() {
        "preview".to_string()
    } else {
        id.to_string()
    }
}

/// Parse an expiry such as `7d`, `12h` or `2w`.
pub fn parse_expiry(expires: &str) -> Option<chrono::TimeDelta> {
    let expires = expires.trim();
    let unit = expires.chars().last()?;
    let amount: i64 = expires[..expires.len() - unit.len_utf8()].parse().ok()?;
    match unit {
        'h' => chrono::TimeDelta::try_hours(amount),
        'd' => chrono::TimeDelta::try_days(amount),
        'w' => chrono::TimeDelta::try_weeks(amount),
        _ => None,
    }
}

/// Preview URLs from deploy output.
///
/// Reads the `--json` result object first and falls back to scanning the
/// text for hosting URLs.
pub fn parse_deploy_urls(output: &str) -> Vec<String> {
    static URL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"https?://[^\s"'\]\)]+\.(?:web\.app|firebaseapp\.com)"#).expect("valid regex")
    });

    let mut urls = Vec::new();
    if let Ok(json) = serde_json::from_str::<Value>(output.trim()) {
        if let Some(sites) = json.get("result").and_then(Value::as_object) {
            for site in sites.values() {
                if let Some(url) = site.get("url").and_then(Value::as_str) {
                    urls.push(url.to_string());
                }
            }
        }
    }
    if urls.is_empty() {
        for m in URL.find_iter(output) {
            if !urls.iter().any(|u| u == m.as_str()) {
                urls.push(m.as_str().to_string());
            }
        }
    }
    urls
}

/// Earliest `expireTime` in deploy `--json` output.
pub fn parse_deploy_expiry(output: &str) -> Option<String> {
    let json: Value = serde_json::from_str(output.trim()).ok()?;
    json.get("result")?
        .as_object()?
        .values()
        .filter_map(|site| site.get("expireTime").and_then(Value::as_str))
        .min()
        .map(str::to_string)
}

/// Channels from `hosting:channel:list --json` output.
pub fn parse_channel_list(output: &str) -> anyhow::Result<Vec<Channel>> {
    let json: Value = serde_json::from_str(output.trim())?;
    if json.get("status").and_then(Value::as_str) == Some("error") {
        let message = json.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        anyhow::bail!("{message}");
    }
    let channels = json
        .pointer("/result/channels")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|channel| {
                    let name = channel.get("name").and_then(Value::as_str)?;
                    Some(Channel {
                        id: name.rsplit('/').next().unwrap_or(name).to_string(),
                        url: channel.get("url").and_then(Value::as_str).map(String::from),
                        expires_at: channel
                            .get("expireTime")
                            .and_then(Value::as_str)
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(channels)
}

/// Interpret the result of [`LOGIN_LIST`].
pub fn parse_login_list(result: &CommandResult) -> AuthState {
    static ACCOUNT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"Logged in as (\S+)").expect("valid regex"));

    let text = result.combined();
    if let Some(caps) = ACCOUNT.captures(&text) {
        return AuthState::LoggedIn(Some(caps[1].to_string()));
    }
    if is_auth_failure(&text) {
        return AuthState::LoggedOut;
    }
    if result.is_success() {
        AuthState::LoggedIn(None)
    } else {
        AuthState::Unavailable(result.error().unwrap_or("unknown error").to_string())
    }
}

/// Whether failure text says the operator must log in.
pub fn is_auth_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("no authorized accounts")
        || lower.contains("failed to authenticate")
        || lower.contains("firebase login")
        || lower.contains("credentials are no longer valid")
}

/// `firebase` operations issued through the executor.
#[derive(Debug, Clone)]
pub struct HostingCli {
    executor: Executor,
    settings: DeploySettings,
    deploy_timeout: Duration,
}

impl HostingCli {
    /// Create a client for the configured project.
    pub fn new(executor: Executor, settings: DeploySettings, deploy_timeout: Duration) -> Self {
        Self { executor, settings, deploy_timeout }
    }

    fn project_flag(&self) -> String {
        self.settings
            .project
            .as_deref()
            .map(|project| format!(" --project {}", quote(project)))
            .unwrap_or_default()
    }

    /// Current login state.
    pub async fn auth_status(&self) -> AuthState {
        let result = self.executor.execute(LOGIN_LIST, &ExecOptions::query()).await;
        parse_login_list(&result)
    }

    /// Deploy the working tree to a preview channel.
    ///
    /// The raw result is returned so a failed deploy can still be mined
    /// for URLs.
    pub async fn deploy_channel(&self, channel: &str) -> CommandResult {
        let command = format!(
            "firebase hosting:channel:deploy {} --expires {} --json{}",
            quote(channel),
            quote(&self.settings.expires),
            self.project_flag()
        );
        let options = ExecOptions::mutation().ignore_error().timeout(self.deploy_timeout);
        self.executor.execute(&command, &options).await
    }

    /// Build a report from a successful deploy result.
    pub fn report_for(&self, channel: &str, result: &CommandResult) -> Option<DeployReport> {
        let urls: Vec<String> = parse_deploy_urls(result.output())
            .into_iter()
            .filter(|url| url.starts_with("https://"))
            .collect();
        if !result.is_success() || urls.is_empty() {
            return None;
        }
        let now = chrono::Local::now();
        let expires_at = parse_deploy_expiry(result.output()).or_else(|| {
            parse_expiry(&self.settings.expires).map(|ttl| (now + ttl).to_rfc3339())
        });
        Some(DeployReport {
            channel: channel.to_string(),
            urls,
            expires_at,
            created_at: now.to_rfc3339(),
        })
    }

    /// All preview channels of the project.
    pub async fn list_channels(&self) -> Result<Vec<Channel>, WorkflowError> {
        let command = format!("firebase hosting:channel:list --json{}", self.project_flag());
        let result = self.executor.execute(&command, &ExecOptions::query()).await;
        if !result.is_success() {
            return Err(self.failure(&command, &result));
        }
        parse_channel_list(result.output()).map_err(|e| WorkflowError::ExternalCommand {
            command,
            message: format!("unexpected output: {e}"),
        })
    }

    /// Delete a preview channel.
    pub async fn delete_channel(&self, id: &str) -> Result<(), WorkflowError> {
        let command =
            format!("firebase hosting:channel:delete {} --force{}", quote(id), self.project_flag());
        let result = self.executor.execute(&command, &ExecOptions::mutation()).await;
        if result.is_success() {
            Ok(())
        } else {
            Err(self.failure(&command, &result))
        }
    }

    /// Classify a failed command, recognising expired logins.
    pub fn failure(&self, command: &str, result: &CommandResult) -> WorkflowError {
        if is_auth_failure(&result.combined()) {
            WorkflowError::auth(TOOL, "firebase login --reauth")
        } else {
            WorkflowError::from_result(command, result)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::mock::ScriptedSpawner;

    const DEPLOY_JSON: &str = r#"{
      "status": "success",
      "result": {
        "acme-web": {
          "site": "acme-web",
          "url": "https://acme-web--feature-x-1a2b3c4d.web.app",
          "expireTime": "2026-10-23T10:00:00.000Z"
        }
      }
    }"#;

    fn cli(spawner: Arc<ScriptedSpawner>, project: Option<&str>) -> HostingCli {
        let settings = DeploySettings { project: project.map(String::from), ..Default::default() };
        HostingCli::new(Executor::with_spawner(spawner), settings, Duration::from_secs(600))
    }

    #[test]
    fn test_channel_id_for_branch() {
        assert_eq!(channel_id_for_branch("", "feature/Login_Form"), "feature-login-form");
        assert_eq!(channel_id_for_branch("pr-", "fix//double"), "pr-fix-double");
        assert_eq!(channel_id_for_branch("", "--"), "preview");
        let long = channel_id_for_branch("", &"a".repeat(60));
        assert_eq!(long.len(), MAX_CHANNEL_LEN);
        let cut = channel_id_for_branch("", &format!("{}-tail", "b".repeat(39)));
        assert!(!cut.ends_with('-'));
    }

    #[test]
    fn test_parse_expiry() {
        assert_eq!(parse_expiry("7d"), chrono::TimeDelta::try_days(7));
        assert_eq!(parse_expiry("12h"), chrono::TimeDelta::try_hours(12));
        assert_eq!(parse_expiry("2w"), chrono::TimeDelta::try_weeks(2));
        assert_eq!(parse_expiry("soon"), None);
        assert_eq!(parse_expiry(""), None);
    }

    #[test]
    fn test_parse_deploy_urls_json() {
        assert_eq!(
            parse_deploy_urls(DEPLOY_JSON),
            vec!["https://acme-web--feature-x-1a2b3c4d.web.app".to_string()]
        );
        assert_eq!(parse_deploy_expiry(DEPLOY_JSON).as_deref(), Some("2026-10-23T10:00:00.000Z"));
    }

    #[test]
    fn test_parse_deploy_urls_text() {
        let text = "Channel URL (acme): https://acme--ch-abc.web.app [expires ...]\nalso https://acme--ch-abc.firebaseapp.com";
        assert_eq!(
            parse_deploy_urls(text),
            vec![
                "https://acme--ch-abc.web.app".to_string(),
                "https://acme--ch-abc.firebaseapp.com".to_string()
            ]
        );
        assert!(parse_deploy_urls("Error: deploy failed").is_empty());
    }

    #[test]
    fn test_parse_channel_list() {
        let json = r#"{"status":"success","result":{"channels":[
            {"name":"projects/p/sites/acme/channels/live","url":"https://acme.web.app"},
            {"name":"projects/p/sites/acme/channels/feature-x","url":"https://acme--feature-x-1a.web.app","expireTime":"2026-10-23T10:00:00Z"}
        ]}}"#;
        let channels = parse_channel_list(json).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1].id, "feature-x");
        assert!(channels[0].expires_at.is_none());

        assert!(parse_channel_list(r#"{"status":"error","error":"no project"}"#).is_err());
    }

    #[test]
    fn test_parse_login_list() {
        let ok = CommandResult::success("Logged in as dev@acme.io\n");
        assert_eq!(parse_login_list(&ok), AuthState::LoggedIn(Some("dev@acme.io".into())));

        let none = CommandResult::success("⚠  No authorized accounts, run \"firebase login\"\n");
        assert_eq!(parse_login_list(&none), AuthState::LoggedOut);

        let missing = CommandResult::failure("", "sh: firebase: command not found", Some(127));
        assert!(matches!(parse_login_list(&missing), AuthState::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_deploy_command_and_report() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on("firebase hosting:channel:deploy", CommandResult::success(DEPLOY_JSON));
        let hosting = cli(spawner.clone(), Some("acme-web"));

        let result = hosting.deploy_channel("feature-x").await;
        assert_eq!(
            spawner.calls(),
            vec!["firebase hosting:channel:deploy feature-x --expires 7d --json --project acme-web"
                .to_string()]
        );

        let report = hosting.report_for("feature-x", &result).unwrap();
        assert_eq!(report.urls.len(), 1);
        assert_eq!(report.expires_at.as_deref(), Some("2026-10-23T10:00:00.000Z"));
    }

    #[tokio::test]
    async fn test_failed_deploy_has_no_report() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on(
            "firebase hosting:channel:deploy",
            CommandResult::failure("", "Error: HTTP Error: 503", Some(1)),
        );
        let hosting = cli(spawner, None);
        let result = hosting.deploy_channel("feature-x").await;
        assert!(hosting.report_for("feature-x", &result).is_none());
    }

    #[tokio::test]
    async fn test_delete_channel_auth_failure() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on(
            "firebase hosting:channel:delete",
            CommandResult::failure("", "Error: Failed to authenticate, have you run firebase login?", Some(1)),
        );
        let hosting = cli(spawner.clone(), None);
        let err = hosting.delete_channel("feature-x").await.unwrap_err();
        assert_eq!(err.remediation().as_deref(), Some("firebase login --reauth"));
        assert_eq!(spawner.calls(), vec!["firebase hosting:channel:delete feature-x --force".to_string()]);
    }

    #[tokio::test]
    async fn test_deploy_uses_deploy_timeout() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on_delayed(
            "firebase hosting:channel:deploy",
            Duration::from_millis(200),
            CommandResult::success(DEPLOY_JSON),
        );
        let hosting = HostingCli::new(
            Executor::with_spawner(spawner),
            DeploySettings::default(),
            Duration::from_millis(10),
        );
        let result = hosting.deploy_channel("feature-x").await;
        assert!(result.is_timed_out());
    }
}
