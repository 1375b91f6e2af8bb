//! Release workflow.
//!
//! ## Steps
//!
//! - `branch_setup` - make sure work happens on a feature branch
//! - `code_changes` - commit and push pending changes
//! - `repo_hygiene` - repair `.gitignore` and prune temp files
//! - `preview_deploy` - deploy a preview channel and record its URLs
//! - `pull_request` - open or update the pull request
//! - `completion` - summarize, always runs
//!
//! [`WorkflowDriver`] runs the steps; [`StatusReport`] is the read-only
//! counterpart used by `shipline status`.

mod driver;
mod hygiene;
mod status;
mod summary;

pub use driver::{RunOptions, StageOutcome, WorkflowDriver, STEPS};
pub use hygiene::{ensure_gitignore, prune_temp_files, run_hygiene, HygieneReport};
pub use status::StatusReport;
pub use summary::{PullRequestSummary, RunSummary, SUMMARY_FILE};
