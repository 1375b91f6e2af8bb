//! Configuration management for Shipline.
//!
//! Handles loading configuration from TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version-control settings
    pub git: GitSettings,

    /// Result cache settings
    pub cache: CacheSettings,

    /// Retry policy for remote mutations
    pub retry: RetrySettings,

    /// Timeouts for external commands
    pub executor: ExecutorSettings,

    /// Preview deployment settings
    pub deploy: DeploySettings,

    /// Repository hygiene settings
    pub hygiene: HygieneSettings,

    /// Pull request settings
    pub pull_request: PullRequestSettings,
}

/// Version-control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// Trunk branch that feature branches merge into
    pub trunk: String,

    /// Remote to push to
    pub remote: String,

    /// Whether to push the feature branch before deploying
    pub push: bool,
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether read-only queries are memoized
    pub enabled: bool,

    /// Entry lifetime in milliseconds
    pub ttl_ms: u64,
}

/// Retry policy for remote mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per mutation
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
}

/// Timeouts for external commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Default timeout for any command, in seconds
    pub default_timeout_secs: u64,

    /// Timeout for builds, checks and deploys, in seconds
    pub deploy_timeout_secs: u64,
}

/// Preview deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Whether the preview deploy step runs
    pub enabled: bool,

    /// Prefix prepended to preview channel ids
    pub channel_prefix: String,

    /// Channel expiry passed to the hosting CLI
    pub expires: String,

    /// Hosting project id (defaults to the CLI's active project)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Build, test and lint commands run before deploying
    pub checks: Vec<String>,

    /// Directory for deploy reports and run summaries
    pub report_dir: String,
}

/// Repository hygiene settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HygieneSettings {
    /// Lines that must be present in `.gitignore`
    pub gitignore_entries: Vec<String>,

    /// File name patterns considered stale temp files
    pub temp_patterns: Vec<String>,

    /// Minimum age before a temp file is pruned, in hours
    pub temp_max_age_hours: u64,
}

/// Pull request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestSettings {
    /// Open pull requests as drafts
    pub draft: bool,

    /// Title template; `{branch}` is replaced with the branch name
    pub title_template: String,

    /// Labels to apply on creation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self { trunk: "main".to_string(), remote: "origin".to_string(), push: true }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true, ttl_ms: 3000 }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, delay_ms: 2000 }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self { default_timeout_secs: 120, deploy_timeout_secs: 600 }
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_prefix: String::new(),
            expires: "7d".to_string(),
            project: None,
            checks: Vec::new(),
            report_dir: ".shipline".to_string(),
        }
    }
}

impl Default for HygieneSettings {
    fn default() -> Self {
        Self {
            gitignore_entries: vec![
                ".shipline/".to_string(),
                ".firebase/".to_string(),
                "*.log".to_string(),
            ],
            temp_patterns: vec!["*.tmp".to_string(), "firebase-debug*.log".to_string()],
            temp_max_age_hours: 24,
        }
    }
}

impl Default for PullRequestSettings {
    fn default() -> Self {
        Self { draft: false, title_template: "{branch}".to_string(), labels: Vec::new() }
    }
}

impl CacheSettings {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl ExecutorSettings {
    /// Default command timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Timeout for long-running build and deploy commands.
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }
}

impl HygieneSettings {
    /// Minimum age of a prunable temp file.
    pub fn temp_max_age(&self) -> Duration {
        Duration::from_secs(self.temp_max_age_hours * 3600)
    }
}

impl PullRequestSettings {
    /// Render the title template for a branch.
    pub fn title_for(&self, branch: &str) -> String {
        self.title_template.replace("{branch}", branch)
    }
}

impl DeploySettings {
    /// Report directory resolved against the repository root.
    ///
    /// A leading `~` expands to the home directory.
    pub fn report_path(&self, root: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(&self.report_dir);
        let path = PathBuf::from(expanded.as_ref());
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }
}

impl Config {
    /// Load configuration for a repository.
    ///
    /// Looks for config in:
    /// 1. `.shipline.toml` in the repository root
    /// 2. `~/.config/shipline/config.toml`
    /// 3. Falls back to defaults
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let local_config = root.join(".shipline.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("shipline"))
    }
}
