//! Step-based progress tracking.
//!
//! Each workflow step moves `pending -> running -> {succeeded | failed |
//! skipped}`. Steps are declared once, run in ascending order, and only one
//! may be running at a time. Every transition emits a human-readable line.

use std::time::{Duration, Instant};

use crossterm::style::Stylize;
use serde::Serialize;
use thiserror::Error;

/// Status of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not started
    Pending,
    /// Step is currently running
    Running,
    /// Step completed successfully
    Succeeded,
    /// Step failed
    Failed,
    /// Step was skipped
    Skipped,
}

impl StepStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Single-character marker used in progress lines.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Pending => "·",
            Self::Running => "▶",
            Self::Succeeded => "✓",
            Self::Failed => "✗",
            Self::Skipped => "↷",
        }
    }
}

/// One named stage of the workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStep {
    /// Position in the declared order, starting at 1
    pub id: usize,
    /// Short name
    pub name: String,
    /// What the step does
    pub description: String,
    /// Current status
    pub status: StepStatus,
    /// Message attached on completion
    pub message: Option<String>,
    /// Time spent running
    #[serde(skip)]
    pub duration: Option<Duration>,
    #[serde(skip)]
    started_at: Option<Instant>,
}

/// Rejected progress transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("progress has not been initialized")]
    NotInitialized,

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("cannot start '{requested}' while '{running}' is running")]
    StepAlreadyRunning { running: String, requested: String },

    #[error("step '{0}' has already finished")]
    StepFinished(String),

    #[error("step '{requested}' cannot run after '{latest}'")]
    OutOfOrder { requested: String, latest: String },

    #[error("no step is running")]
    NoStepRunning,

    #[error("progress has already finished")]
    AlreadyFinished,
}

/// Tracks the ordered steps of one workflow run.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    title: String,
    steps: Vec<WorkflowStep>,
    running: Option<usize>,
    latest: Option<usize>,
    outcome: Option<bool>,
    quiet: bool,
    lines: Vec<String>,
}

impl ProgressTracker {
    /// Create an empty tracker that prints its progress lines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record progress lines without printing them.
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Declare the full ordered set of steps as `(name, description)` pairs.
    pub fn init_progress(&mut self, title: &str, steps: &[(&str, &str)]) {
        self.title = title.to_string();
        self.steps = steps
            .iter()
            .enumerate()
            .map(|(index, (name, description))| WorkflowStep {
                id: index + 1,
                name: (*name).to_string(),
                description: (*description).to_string(),
                status: StepStatus::Pending,
                message: None,
                duration: None,
                started_at: None,
            })
            .collect();
        self.running = None;
        self.latest = None;
        self.outcome = None;
        self.emit(format!("{} ({} steps)", title, steps.len()), LineKind::Title);
    }

    /// Total number of declared steps.
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Start the named step.
    ///
    /// Pending steps declared before it are marked skipped.
    pub fn start_step(&mut self, name: &str) -> Result<usize, ProgressError> {
        let index = self.ready(name)?;

        if let Some(running) = self.running {
            return Err(ProgressError::StepAlreadyRunning {
                running: self.steps[running].name.clone(),
                requested: name.to_string(),
            });
        }
        if self.steps[index].status.is_terminal() {
            return Err(ProgressError::StepFinished(name.to_string()));
        }
        if let Some(latest) = self.latest {
            if index < latest {
                return Err(ProgressError::OutOfOrder {
                    requested: name.to_string(),
                    latest: self.steps[latest].name.clone(),
                });
            }
        }

        for skipped in 0..index {
            if self.steps[skipped].status == StepStatus::Pending {
                self.steps[skipped].status = StepStatus::Skipped;
            }
        }

        let step = &mut self.steps[index];
        step.status = StepStatus::Running;
        step.started_at = Some(Instant::now());
        self.running = Some(index);
        self.latest = Some(index);

        let line = format!("[{}/{}] {}", index + 1, self.steps.len(), self.steps[index].description);
        self.emit(line, LineKind::Status(StepStatus::Running));
        Ok(index + 1)
    }

    /// Complete the running step.
    pub fn complete_step(&mut self, success: bool, message: &str) -> Result<(), ProgressError> {
        let status = if success { StepStatus::Succeeded } else { StepStatus::Failed };
        self.finish_running(status, message)
    }

    /// Mark the running step as skipped.
    pub fn skip_current(&mut self, reason: &str) -> Result<(), ProgressError> {
        self.finish_running(StepStatus::Skipped, reason)
    }

    /// Mark a pending step as skipped without running it.
    pub fn skip_step(&mut self, name: &str, reason: &str) -> Result<(), ProgressError> {
        let index = self.ready(name)?;
        if self.steps[index].status != StepStatus::Pending {
            return Err(ProgressError::StepFinished(name.to_string()));
        }
        self.steps[index].status = StepStatus::Skipped;
        self.steps[index].message = Some(reason.to_string());
        let line = format!("[{}/{}] {} ({reason})", index + 1, self.steps.len(), self.steps[index].description);
        self.emit(line, LineKind::Status(StepStatus::Skipped));
        Ok(())
    }

    /// End the whole run.
    ///
    /// A still-running step is force-marked failed and remaining pending
    /// steps are marked skipped, so the tracker always ends terminal.
    pub fn finish_progress(&mut self, success: bool, message: &str) -> Result<(), ProgressError> {
        if self.outcome.is_some() {
            return Err(ProgressError::AlreadyFinished);
        }

        if let Some(index) = self.running.take() {
            let step = &mut self.steps[index];
            step.status = StepStatus::Failed;
            step.duration = step.started_at.map(|t| t.elapsed());
            step.message.get_or_insert_with(|| "interrupted".to_string());
        }
        for step in &mut self.steps {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }

        self.outcome = Some(success);
        let status = if success { StepStatus::Succeeded } else { StepStatus::Failed };
        self.emit(format!("{}: {message}", self.title), LineKind::Status(status));
        Ok(())
    }

    /// Whether `finish_progress` has been called.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Final outcome, once finished.
    pub fn outcome(&self) -> Option<bool> {
        self.outcome
    }

    /// The running step, if any.
    pub fn current_step(&self) -> Option<&WorkflowStep> {
        self.running.map(|index| &self.steps[index])
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// All declared steps in order.
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Every progress line emitted so far, without styling.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn ready(&self, name: &str) -> Result<usize, ProgressError> {
        if self.outcome.is_some() {
            return Err(ProgressError::AlreadyFinished);
        }
        if self.steps.is_empty() {
            return Err(ProgressError::NotInitialized);
        }
        self.steps
            .iter()
            .position(|step| step.name == name)
            .ok_or_else(|| ProgressError::UnknownStep(name.to_string()))
    }

    fn finish_running(&mut self, status: StepStatus, message: &str) -> Result<(), ProgressError> {
        if self.outcome.is_some() {
            return Err(ProgressError::AlreadyFinished);
        }
        let index = self.running.take().ok_or(ProgressError::NoStepRunning)?;
        let total = self.steps.len();

        let step = &mut self.steps[index];
        step.status = status;
        step.duration = step.started_at.map(|t| t.elapsed());
        if !message.is_empty() {
            step.message = Some(message.to_string());
        }

        let mut line = format!("[{}/{}] {}", index + 1, total, step.description);
        if !message.is_empty() {
            line.push_str(&format!(": {message}"));
        }
        self.emit(line, LineKind::Status(status));
        Ok(())
    }

    fn emit(&mut self, text: String, kind: LineKind) {
        tracing::info!(progress = %text);
        if !self.quiet {
            match kind {
                LineKind::Title => println!("{}", text.as_str().bold()),
                LineKind::Status(status) => {
                    let symbol = match status {
                        StepStatus::Succeeded => status.symbol().green(),
                        StepStatus::Failed => status.symbol().red(),
                        StepStatus::Skipped => status.symbol().dark_grey(),
                        StepStatus::Running | StepStatus::Pending => status.symbol().cyan(),
                    };
                    println!("{symbol} {text}");
                }
            }
        }
        self.lines.push(text);
    }
}

#[derive(Debug, Clone, Copy)]
enum LineKind {
    Title,
    Status(StepStatus),
}
