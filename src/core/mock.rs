//! Scripted spawner for tests and dry runs.
//!
//! Answers commands from a rule table instead of starting processes and
//! records every command it was asked to run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandResult, ExecOptions, Spawner};

type Responder = Arc<dyn Fn(&str) -> CommandResult + Send + Sync>;

struct Rule {
    prefix: String,
    delay: Option<Duration>,
    respond: Responder,
}

/// A [`Spawner`] driven by prefix rules.
///
/// The longest matching prefix wins; unmatched commands succeed with empty
/// output.
#[derive(Default)]
pub struct ScriptedSpawner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, ExecOptions)>>,
}

impl ScriptedSpawner {
    /// Create a spawner with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with a fixed result.
    pub fn on(&self, prefix: &str, result: CommandResult) -> &Self {
        self.on_with(prefix, move |_| result.clone())
    }

    /// Answer commands starting with `prefix` by calling `respond`.
    pub fn on_with<F>(&self, prefix: &str, respond: F) -> &Self
    where
        F: Fn(&str) -> CommandResult + Send + Sync + 'static,
    {
        self.rules.lock().push(Rule {
            prefix: prefix.to_string(),
            delay: None,
            respond: Arc::new(respond),
        });
        self
    }

    /// Answer after `delay`, honouring the caller's timeout.
    pub fn on_delayed(&self, prefix: &str, delay: Duration, result: CommandResult) -> &Self {
        self.rules.lock().push(Rule {
            prefix: prefix.to_string(),
            delay: Some(delay),
            respond: Arc::new(move |_| result.clone()),
        });
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(cmd, _)| cmd.clone()).collect()
    }

    /// Number of commands run that start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|(cmd, _)| cmd.starts_with(prefix)).count()
    }

    /// Whether any command starting with `prefix` was run.
    pub fn ran(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    /// Working directory of the most recent call.
    pub fn last_working_dir(&self) -> Option<PathBuf> {
        self.calls.lock().last().and_then(|(_, opts)| opts.working_dir.clone())
    }

    fn lookup(&self, command: &str) -> (Option<Duration>, Option<Responder>) {
        let rules = self.rules.lock();
        rules
            .iter()
            .filter(|rule| command.starts_with(&rule.prefix))
            .max_by_key(|rule| rule.prefix.len())
            .map_or((None, None), |rule| (rule.delay, Some(rule.respond.clone())))
    }

    fn record(&self, command: &str, options: &ExecOptions) {
        self.calls.lock().push((command.to_string(), options.clone()));
    }
}

#[async_trait]
impl Spawner for ScriptedSpawner {
    async fn spawn(&self, command: &str, options: &ExecOptions) -> CommandResult {
        self.record(command, options);
        let (delay, respond) = self.lookup(command);

        if let Some(delay) = delay {
            match options.timeout {
                Some(limit) if limit < delay => {
                    tokio::time::sleep(limit).await;
                    return CommandResult::timed_out("", limit);
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        respond.map_or_else(|| CommandResult::success(""), |respond| respond(command))
    }

    fn spawn_blocking(&self, command: &str, options: &ExecOptions) -> CommandResult {
        self.record(command, options);
        let (delay, respond) = self.lookup(command);

        if let Some(delay) = delay {
            match options.timeout {
                Some(limit) if limit < delay => {
                    std::thread::sleep(limit);
                    return CommandResult::timed_out("", limit);
                }
                _ => std::thread::sleep(delay),
            }
        }

        respond.map_or_else(|| CommandResult::success(""), |respond| respond(command))
    }
}
