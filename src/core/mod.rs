//! Core orchestration engine for Shipline.
//!
//! This module contains the pieces every workflow step is built from:
//! command execution with result caching, parallel fan-out, progress and
//! run-state tracking, and the idempotent retry policy for remote mutations.

mod auth;
mod cache;
mod command;
mod config;
mod context;
mod error;
mod executor;
pub mod mock;
mod parallel;
mod progress;
mod retry;
mod state;

pub use auth::AuthState;
pub use cache::{is_cacheable, CacheEntry, ResultCache, DEFAULT_TTL};
pub use command::{quote, CommandResult, ExecOptions};
pub use config::{
    CacheSettings, Config, DeploySettings, ExecutorSettings, GitSettings, HygieneSettings,
    PullRequestSettings, RetrySettings,
};
pub use context::WorkflowContext;
pub use error::{MutationError, WorkflowError};
pub use executor::{Executor, ExecutorStats, ShellSpawner, Spawner};
pub use parallel::{run_parallel, Operation};
pub use progress::{ProgressError, ProgressTracker, StepStatus, WorkflowStep};
pub use retry::{
    retry_mutation, AttemptError, AttemptOutcome, IdempotentPolicy, Reconcilable, Reconciled,
    RetryableMutation,
};
pub use state::{Metric, WorkflowState};
