//! End-of-run summary.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crossterm::style::Stylize;
use serde::Serialize;

use crate::core::{Metric, StepStatus, WorkflowError, WorkflowState, WorkflowStep};
use crate::github::PullRequest;

/// File name of the summary inside the report directory.
pub const SUMMARY_FILE: &str = "last-run.json";

/// Pull request outcome as reported in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestSummary {
    /// Pull request number
    pub number: u64,
    /// HTML URL
    pub url: String,
    /// Whether it existed before this run
    pub already_exists: bool,
}

impl PullRequestSummary {
    pub fn new(pr: &PullRequest, already_exists: bool) -> Self {
        Self { number: pr.number, url: pr.url.clone(), already_exists }
    }
}

/// Everything reported when a run ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub operation: String,
    pub started_at: String,
    pub success: bool,
    pub aborted: bool,
    pub duration_ms: u64,
    pub branch: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub metrics: BTreeMap<String, Metric>,
    pub preview_urls: Vec<String>,
    pub pull_request: Option<PullRequestSummary>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub remediation: Option<String>,
}

impl RunSummary {
    /// Build a summary from a finished run.
    pub fn from_state(state: &WorkflowState, steps: &[WorkflowStep], error: Option<&WorkflowError>) -> Self {
        Self {
            run_id: state.run_id().to_string(),
            operation: state.operation_name().to_string(),
            started_at: state.started_wall().to_rfc3339(),
            success: state.success().unwrap_or(false),
            aborted: error.is_some_and(WorkflowError::is_abort),
            duration_ms: state.elapsed().as_millis() as u64,
            branch: None,
            steps: steps.to_vec(),
            metrics: state.metrics().clone(),
            preview_urls: Vec::new(),
            pull_request: None,
            warnings: Vec::new(),
            error: state.error().map(str::to_string),
            remediation: error.and_then(WorkflowError::remediation),
        }
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.success)
    }

    /// Human-readable summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let headline = if self.success {
            "Workflow complete".green().bold().to_string()
        } else if self.aborted {
            "Workflow aborted".yellow().bold().to_string()
        } else {
            "Workflow failed".red().bold().to_string()
        };
        let _ = writeln!(out, "\n{headline} ({:.1}s)", self.duration_ms as f64 / 1000.0);

        for step in &self.steps {
            let _ = write!(out, "  {} {}", step.status.symbol(), step.description);
            if let Some(message) = &step.message {
                let _ = write!(out, " - {message}");
            }
            out.push('\n');
        }

        if let Some(branch) = &self.branch {
            let _ = writeln!(out, "\nBranch:  {branch}");
        }
        for url in &self.preview_urls {
            let _ = writeln!(out, "Preview: {url}");
        }
        if let Some(pr) = &self.pull_request {
            let note = if pr.already_exists { " (existing)" } else { "" };
            let _ = writeln!(out, "PR:      #{} {}{note}", pr.number, pr.url);
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "{} {warning}", "warning:".yellow());
        }
        if let Some(error) = &self.error {
            let _ = writeln!(out, "{} {error}", "error:".red());
        }
        if let Some(fix) = &self.remediation {
            let _ = writeln!(out, "  try: {fix}");
        }
        out
    }

    /// Write the summary as JSON into `dir`.
    pub fn write(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(SUMMARY_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Number of steps with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|step| step.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProgressTracker;

    fn finished(success: bool) -> (WorkflowState, ProgressTracker) {
        let mut state = WorkflowState::initialize("ship");
        let mut progress = ProgressTracker::new().quiet();
        progress.init_progress("Ship", &[("a", "First"), ("b", "Second")]);
        progress.start_step("a").unwrap();
        progress.complete_step(true, "done").unwrap();
        progress.finish_progress(success, "end").unwrap();
        if success {
            state.complete();
        } else {
            state.fail("`git push` failed: rejected");
        }
        (state, progress)
    }

    #[test]
    fn test_successful_summary() {
        let (state, progress) = finished(true);
        let mut summary = RunSummary::from_state(&state, progress.steps(), None);
        summary.preview_urls.push("https://acme--x-1.web.app".into());

        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.count(StepStatus::Succeeded), 1);
        assert_eq!(summary.count(StepStatus::Skipped), 1);
        let text = summary.render();
        assert!(text.contains("First - done"));
        assert!(text.contains("Preview: https://acme--x-1.web.app"));
    }

    #[test]
    fn test_failed_summary_carries_remediation() {
        let (state, progress) = finished(false);
        let error = WorkflowError::ExternalCommand {
            command: "git push -u origin x".into(),
            message: "rejected".into(),
        };
        let summary = RunSummary::from_state(&state, progress.steps(), Some(&error));
        assert_eq!(summary.exit_code(), 1);
        assert!(!summary.aborted);
        assert!(summary.render().contains("try: git pull --rebase && git push"));
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let (state, progress) = finished(true);
        let summary = RunSummary::from_state(&state, progress.steps(), None);
        let path = summary.write(&dir.path().join(".shipline")).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["steps"][0]["status"], "succeeded");
        assert_eq!(json["operation"], "ship");
    }
}
