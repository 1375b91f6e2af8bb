//! Workflow run state.
//!
//! One [`WorkflowState`] exists per invocation. It is created when the run
//! starts and moves to a terminal state exactly once, through either
//! [`complete`](WorkflowState::complete) or [`fail`](WorkflowState::fail).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

/// A recorded metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Monotonic counter
    Counter(u64),
    /// Duration in milliseconds
    Millis(u64),
}

/// Aggregate record of one end-to-end run.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    run_id: Uuid,
    operation_name: String,
    started_at: Instant,
    started_wall: DateTime<Local>,
    finished_at: Option<Instant>,
    success: Option<bool>,
    metrics: BTreeMap<String, Metric>,
    error: Option<String>,
}

impl WorkflowState {
    /// Start tracking a new run.
    pub fn initialize(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        let run_id = Uuid::new_v4();
        tracing::debug!(run_id = %run_id, operation = %operation_name, "Workflow started");
        Self {
            run_id,
            operation_name,
            started_at: Instant::now(),
            started_wall: Local::now(),
            finished_at: None,
            success: None,
            metrics: BTreeMap::new(),
            error: None,
        }
    }

    /// Mark the run successful.
    ///
    /// Returns `false` and changes nothing if the run already finished.
    pub fn complete(&mut self) -> bool {
        self.finish(true, None)
    }

    /// Mark the run failed.
    ///
    /// Returns `false` and changes nothing if the run already finished.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        self.finish(false, Some(error.into()))
    }

    fn finish(&mut self, success: bool, error: Option<String>) -> bool {
        if self.success.is_some() {
            tracing::debug!(run_id = %self.run_id, "Ignoring repeated terminal transition");
            return false;
        }
        self.finished_at = Some(Instant::now());
        self.success = Some(success);
        self.error = error;
        tracing::debug!(run_id = %self.run_id, success, elapsed = ?self.elapsed(), "Workflow finished");
        true
    }

    /// Add one to a counter.
    pub fn increment(&mut self, name: &str) {
        self.add(name, 1);
    }

    /// Add `amount` to a counter, creating it if missing.
    pub fn add(&mut self, name: &str, amount: u64) {
        let entry = self.metrics.entry(name.to_string()).or_insert(Metric::Counter(0));
        if let Metric::Counter(value) = entry {
            *value += amount;
        } else {
            *entry = Metric::Counter(amount);
        }
    }

    /// Record a duration, replacing any previous value.
    pub fn record_duration(&mut self, name: &str, duration: Duration) {
        self.metrics.insert(name.to_string(), Metric::Millis(duration.as_millis() as u64));
    }

    /// Look up a metric.
    pub fn metric(&self, name: &str) -> Option<Metric> {
        self.metrics.get(name).copied()
    }

    /// All metrics, sorted by name.
    pub fn metrics(&self) -> &BTreeMap<String, Metric> {
        &self.metrics
    }

    /// Unique id of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Name of the operation being run.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Wall-clock start time.
    pub fn started_wall(&self) -> DateTime<Local> {
        self.started_wall
    }

    /// Terminal status, absent until finished.
    pub fn success(&self) -> Option<bool> {
        self.success
    }

    /// When the run finished.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// Whether a terminal transition has happened.
    pub fn is_finished(&self) -> bool {
        self.success.is_some()
    }

    /// Failure cause, if the run failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Time from start to finish, or to now while running.
    pub fn elapsed(&self) -> Duration {
        self.finished_at.unwrap_or_else(Instant::now).duration_since(self.started_at)
    }
}
