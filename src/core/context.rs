//! Per-invocation workflow context.
//!
//! Bundles everything one workflow run owns: configuration, the executor
//! with its result cache, the run state, and the progress tracker. It is
//! built at entry, handed to the driver, and dropped at exit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Config, Executor, ProgressTracker, ResultCache, Spawner, WorkflowState};

/// Everything a single workflow invocation owns.
#[derive(Debug)]
pub struct WorkflowContext {
    /// Repository root all commands run in
    pub root: PathBuf,

    /// Effective configuration
    pub config: Config,

    /// Command executor (shares the result cache)
    pub executor: Executor,

    /// Run state
    pub state: WorkflowState,

    /// Step tracker
    pub progress: ProgressTracker,
}

impl WorkflowContext {
    /// Build a context that runs real commands.
    pub fn new(operation: &str, root: &Path, config: Config) -> Self {
        Self::build(operation, root, config, Executor::new())
    }

    /// Build a context on top of a custom spawner.
    pub fn with_spawner(
        operation: &str,
        root: &Path,
        config: Config,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self::build(operation, root, config, Executor::with_spawner(spawner))
    }

    fn build(operation: &str, root: &Path, config: Config, executor: Executor) -> Self {
        let cache = if config.cache.enabled {
            ResultCache::new(config.cache.ttl())
        } else {
            ResultCache::disabled()
        };
        let executor = executor
            .cache(Arc::new(cache))
            .working_dir(root)
            .default_timeout(config.executor.default_timeout());

        Self {
            root: root.to_path_buf(),
            config,
            executor,
            state: WorkflowState::initialize(operation),
            progress: ProgressTracker::new(),
        }
    }

    /// Suppress printed progress lines.
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.progress = ProgressTracker::new().quiet();
        self
    }

    /// Directory for reports, resolved against the root.
    pub fn report_dir(&self) -> PathBuf {
        self.config.deploy.report_path(&self.root)
    }

    /// Fold executor counters into the run metrics and drop cached results.
    pub fn teardown(&mut self) {
        let stats = self.executor.stats();
        self.state.add("commands.spawned", stats.spawned);
        self.state.add("commands.failed", stats.failures);
        self.state.add("cache.hits", stats.cache_hits);
        self.state.add("cache.misses", stats.cache_misses);
        self.executor.result_cache().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::ScriptedSpawner;
    use crate::core::{CommandResult, ExecOptions, Metric};

    #[tokio::test]
    async fn test_teardown_clears_cache_and_records_metrics() {
        let spawner = Arc::new(ScriptedSpawner::new());
        spawner.on("git status", CommandResult::success(""));
        let mut ctx =
            WorkflowContext::with_spawner("release", Path::new("/repo"), Config::default(), spawner)
                .quiet();

        ctx.executor.execute("git status --porcelain", &ExecOptions::new()).await;
        ctx.executor.execute("git status --porcelain", &ExecOptions::new()).await;
        assert_eq!(ctx.executor.result_cache().len(), 1);

        ctx.teardown();
        assert!(ctx.executor.result_cache().is_empty());
        assert_eq!(ctx.state.metric("commands.spawned"), Some(Metric::Counter(1)));
        assert_eq!(ctx.state.metric("cache.hits"), Some(Metric::Counter(1)));
    }

    #[test]
    fn test_disabled_cache_config() {
        let mut config = Config::default();
        config.cache.enabled = false;
        let ctx = WorkflowContext::new("release", Path::new("/repo"), config);
        assert!(!ctx.executor.result_cache().is_enabled());
        assert_eq!(ctx.report_dir(), PathBuf::from("/repo/.shipline"));
    }
}
