//! On-disk deploy reports.
//!
//! A successful deploy leaves `deploy-report.json` in the report directory.
//! After a failed deploy the report, together with whatever the CLI printed,
//! is mined for preview URLs that are still valid.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_deploy_urls;

/// File name of the deploy report inside the report directory.
pub const REPORT_FILE: &str = "deploy-report.json";

/// Record of one preview deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    /// Preview channel id
    pub channel: String,
    /// Preview URLs, one per hosting site
    pub urls: Vec<String>,
    /// Expiry timestamp (RFC 3339) when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

impl DeployReport {
    /// Path of the report inside `dir`.
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(REPORT_FILE)
    }

    /// Write the report, creating the directory if needed.
    pub fn write(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = Self::path(dir);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "Wrote deploy report");
        Ok(path)
    }

    /// Load the report from `dir`, if one exists.
    pub fn load(dir: &Path) -> anyhow::Result<Option<Self>> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Whether the report's channel expired before `now`.
    ///
    /// A missing or unparseable expiry counts as still live.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|expires| DateTime::parse_from_rfc3339(expires).ok())
            .is_some_and(|expires| expires < now)
    }
}

/// Whether `url` is a usable preview URL for `channel`.
pub fn is_preview_url(url: &str, channel: &str) -> bool {
    url.starts_with("https://") && url.contains(&format!("--{channel}-"))
}

/// Preview URLs for `channel` recovered after a failed deploy.
///
/// URLs found in the CLI `output` come first, followed by those in an
/// unexpired report for the same channel. Anything unreadable is ignored.
pub fn recover_preview_urls(dir: &Path, channel: &str, output: &str) -> Vec<String> {
    let mut urls: Vec<String> = parse_deploy_urls(output)
        .into_iter()
        .filter(|url| is_preview_url(url, channel))
        .collect();

    match DeployReport::load(dir) {
        Ok(Some(report)) if report.channel == channel && report.is_expired_at(Utc::now()) => {
            tracing::debug!(
                channel = %channel,
                expires_at = report.expires_at.as_deref().unwrap_or_default(),
                "Ignoring expired deploy report"
            );
        }
        Ok(Some(report)) if report.channel == channel => {
            for url in report.urls {
                if is_preview_url(&url, channel) && !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        Ok(Some(report)) => {
            tracing::debug!(found = %report.channel, wanted = %channel, "Ignoring report for another channel");
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read deploy report"),
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(channel: &str, urls: &[&str]) -> DeployReport {
        DeployReport {
            channel: channel.to_string(),
            urls: urls.iter().map(|u| (*u).to_string()).collect(),
            expires_at: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join(".shipline");
        let written = report("feature-x", &["https://acme--feature-x-ab12cd.web.app"]);
        written.write(&nested).unwrap();
        assert_eq!(DeployReport::load(&nested).unwrap(), Some(written));
    }

    #[test]
    fn test_load_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(DeployReport::load(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_recover_from_report() {
        let dir = tempfile::tempdir().unwrap();
        report(
            "feature-x",
            &["https://acme--feature-x-ab12cd.web.app", "http://acme--feature-x-ab12cd.web.app"],
        )
        .write(dir.path())
        .unwrap();

        let urls = recover_preview_urls(dir.path(), "feature-x", "Error: HTTP 503");
        assert_eq!(urls, vec!["https://acme--feature-x-ab12cd.web.app".to_string()]);
    }

    #[test]
    fn test_recover_ignores_other_channel() {
        let dir = tempfile::tempdir().unwrap();
        report("feature-y", &["https://acme--feature-y-ab12cd.web.app"]).write(dir.path()).unwrap();
        assert!(recover_preview_urls(dir.path(), "feature-x", "").is_empty());
    }

    #[test]
    fn test_recover_prefers_output_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        report("feature-x", &["https://acme--feature-x-ab12cd.web.app"]).write(dir.path()).unwrap();
        let output = "✔ hosting:channel: Channel URL (acme): https://acme--feature-x-ab12cd.web.app [expires 2026-01-08]\nError: post-deploy hook failed";
        let urls = recover_preview_urls(dir.path(), "feature-x", output);
        assert_eq!(urls, vec!["https://acme--feature-x-ab12cd.web.app".to_string()]);
    }

    #[test]
    fn test_corrupt_report_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(DeployReport::path(dir.path()), "{not json").unwrap();
        assert!(recover_preview_urls(dir.path(), "feature-x", "").is_empty());
    }

    #[test]
    fn test_recover_skips_expired_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut expired = report("feature-x", &["https://acme--feature-x-ab12cd.web.app"]);
        expired.expires_at = Some("2020-01-01T00:00:00+00:00".to_string());
        expired.write(dir.path()).unwrap();

        assert!(recover_preview_urls(dir.path(), "feature-x", "Error: HTTP 503").is_empty());
    }

    #[test]
    fn test_recover_keeps_unexpired_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut live = report("feature-x", &["https://acme--feature-x-ab12cd.web.app"]);
        live.expires_at = Some((Utc::now() + chrono::TimeDelta::days(7)).to_rfc3339());
        live.write(dir.path()).unwrap();

        let urls = recover_preview_urls(dir.path(), "feature-x", "");
        assert_eq!(urls, vec!["https://acme--feature-x-ab12cd.web.app".to_string()]);
    }

    #[test]
    fn test_is_expired_at() {
        let now = DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let mut r = report("feature-x", &[]);
        assert!(!r.is_expired_at(now));

        r.expires_at = Some("2026-06-01T11:59:59+00:00".to_string());
        assert!(r.is_expired_at(now));
        r.expires_at = Some("2026-06-08T12:00:00+02:00".to_string());
        assert!(!r.is_expired_at(now));
        r.expires_at = Some("next week".to_string());
        assert!(!r.is_expired_at(now));
    }
}
