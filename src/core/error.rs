//! Error taxonomy for workflow runs.
//!
//! Ordinary command failure is not an error here: the executor returns a
//! [`CommandResult`](super::CommandResult) and the caller decides. These
//! types cover the failures that end a step or the whole run.

use std::io;

use thiserror::Error;

use super::progress::ProgressError;
use super::CommandResult;

/// Errors surfaced by the idempotent mutation policy.
///
/// A detected conflict is not represented: it is resolved and reported as
/// a success with `already_exists` set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    /// The external tool needs the operator to log in.
    #[error("{tool} requires authentication: {detail}")]
    AuthenticationRequired { tool: String, detail: String },

    /// The mutation cannot succeed in the current state.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Every attempt failed and no conflict was detected.
    #[error("{action} failed after {attempts} attempt(s): {last_error}")]
    Exhausted { action: String, attempts: u32, last_error: String },
}

/// Errors that terminate a workflow step.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An external command exited non-zero or could not be spawned.
    #[error("`{command}` failed: {message}")]
    ExternalCommand { command: String, message: String },

    /// An external command exceeded its timeout.
    #[error("`{command}` timed out")]
    Timeout { command: String },

    /// A tool reported that the operator is not logged in.
    #[error("{tool} requires authentication")]
    AuthenticationRequired { tool: String, remediation: String },

    /// The workflow cannot proceed in the current repository state.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The operator chose to cancel at a decision point.
    #[error("aborted: {0}")]
    OperatorAborted(String),

    /// A retried mutation ran out of attempts.
    #[error("{action} failed after {attempts} attempt(s): {last_error}")]
    Exhausted { action: String, attempts: u32, last_error: String },

    /// The progress tracker rejected a transition.
    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// Reading operator input failed.
    #[error("prompt failed: {0}")]
    Prompt(#[from] io::Error),
}

impl WorkflowError {
    /// Classify a failed command result.
    pub fn from_result(command: &str, result: &CommandResult) -> Self {
        if result.is_timed_out() {
            Self::Timeout { command: command.to_string() }
        } else {
            Self::ExternalCommand {
                command: command.to_string(),
                message: result.error().unwrap_or("unknown failure").to_string(),
            }
        }
    }

    /// Authentication failure for a named tool.
    pub fn auth(tool: &str, remediation: &str) -> Self {
        Self::AuthenticationRequired { tool: tool.to_string(), remediation: remediation.to_string() }
    }

    /// Whether the operator cancelled the run.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::OperatorAborted(_))
    }

    /// A command the operator can run to fix the problem.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::AuthenticationRequired { remediation, .. } => Some(remediation.clone()),
            Self::Timeout { command } => {
                Some(format!("Re-run `{command}` manually to see where it stalls"))
            }
            Self::ExternalCommand { command, .. } if command.starts_with("git push") => {
                Some("git pull --rebase && git push".to_string())
            }
            Self::ExternalCommand { command, .. } => {
                Some(format!("Run `{command}` manually to inspect the failure"))
            }
            Self::PreconditionFailed(_) => Some("git status".to_string()),
            Self::Exhausted { .. } => Some("Check your network connection and retry".to_string()),
            Self::OperatorAborted(_) | Self::Progress(_) | Self::Prompt(_) => None,
        }
    }
}

impl From<MutationError> for WorkflowError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::AuthenticationRequired { tool, .. } => {
                let remediation = format!("{tool} auth login");
                Self::AuthenticationRequired { tool, remediation }
            }
            MutationError::PreconditionFailed(msg) => Self::PreconditionFailed(msg),
            MutationError::Exhausted { action, attempts, last_error } => {
                Self::Exhausted { action, attempts, last_error }
            }
        }
    }
}
