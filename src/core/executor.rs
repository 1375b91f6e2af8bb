//! Command execution module.
//!
//! Handles spawning shell processes, capturing output, and enforcing
//! timeouts. Every external tool the workflow talks to goes through
//! [`Executor`], which never returns an error for an ordinary command
//! failure: it hands back a [`CommandResult`] and lets the caller decide.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::cache::is_cacheable;
use super::{CommandResult, ExecOptions, ResultCache};

/// Starts external processes on behalf of the executor.
///
/// Implementations must not panic and must turn every failure, including
/// a missing executable, into an unsuccessful [`CommandResult`].
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Run a command to completion without blocking the runtime.
    async fn spawn(&self, command: &str, options: &ExecOptions) -> CommandResult;

    /// Run a command to completion on the calling thread.
    fn spawn_blocking(&self, command: &str, options: &ExecOptions) -> CommandResult;
}

/// Runs commands through the platform shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellSpawner;

impl ShellSpawner {
    fn std_command(command: &str, options: &ExecOptions) -> ProcessCommand {
        let (shell, shell_arg) = get_shell();
        let mut cmd = ProcessCommand::new(shell);
        cmd.arg(shell_arg).arg(command);

        if let Some(ref dir) = options.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        if options.stream {
            cmd.stdin(Stdio::inherit());
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());

            // Own process group, so a timeout reaches every process the
            // shell started. Streamed commands stay in the terminal's group.
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                cmd.process_group(0);
            }
        }
        cmd
    }
}

/// Kill the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else { return };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        tracing::debug!(pid, error = %e, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[async_trait]
impl Spawner for ShellSpawner {
    async fn spawn(&self, command: &str, options: &ExecOptions) -> CommandResult {
        let start = Instant::now();
        let mut cmd = tokio::process::Command::from(Self::std_command(command, options));
        cmd.kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandResult::spawn_failure(format!("failed to spawn: {e}")),
        };
        let pid = child.id();

        // Dropping the wait future kills the shell; the group kill takes
        // whatever it started.
        let waited = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    if let Some(pid) = pid.filter(|_| !options.stream) {
                        kill_process_group(pid);
                    }
                    return CommandResult::timed_out("", limit);
                }
            },
            None => child.wait_with_output().await,
        };

        match waited {
            Ok(output) => CommandResult::from_output(
                output.status.code(),
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            )
            .with_duration(start.elapsed()),
            Err(e) => CommandResult::spawn_failure(format!("failed to wait for process: {e}"))
                .with_duration(start.elapsed()),
        }
    }

    fn spawn_blocking(&self, command: &str, options: &ExecOptions) -> CommandResult {
        let start = Instant::now();
        let mut child = match Self::std_command(command, options).spawn() {
            Ok(child) => child,
            Err(e) => return CommandResult::spawn_failure(format!("failed to spawn: {e}")),
        };

        // Drain pipes on threads so a chatty child cannot fill them and stall.
        let stdout = child.stdout.take().map(|mut out| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut err| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let collect = |handle: Option<std::thread::JoinHandle<Vec<u8>>>| {
            handle
                .and_then(|h| h.join().ok())
                .map(|buf| String::from_utf8_lossy(&buf).to_string())
                .unwrap_or_default()
        };

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(limit) = options.timeout {
                        if start.elapsed() >= limit {
                            if !options.stream {
                                kill_process_group(child.id());
                            }
                            let _ = child.kill();
                            let _ = child.wait();
                            // The readers are detached, not joined: a process
                            // that escaped the group may still hold the pipes.
                            drop((stdout, stderr));
                            return CommandResult::timed_out("", limit);
                        }
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    return CommandResult::spawn_failure(format!("failed to wait for process: {e}"))
                }
            }
        };

        CommandResult::from_output(status.code(), collect(stdout), collect(stderr))
            .with_duration(start.elapsed())
    }
}

/// Counters describing executor activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Processes actually started
    pub spawned: u64,
    /// Calls answered from the cache
    pub cache_hits: u64,
    /// Cacheable calls that had to spawn
    pub cache_misses: u64,
    /// Calls that returned an unsuccessful result
    pub failures: u64,
}

/// Command executor.
///
/// Cheap to clone; clones share the spawner, the cache, and the counters.
#[derive(Clone)]
pub struct Executor {
    spawner: Arc<dyn Spawner>,
    cache: Arc<ResultCache>,
    working_dir: Option<PathBuf>,
    default_timeout: Option<Duration>,
    spawned: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("working_dir", &self.working_dir)
            .field("default_timeout", &self.default_timeout)
            .field("cache_ttl", &self.cache.ttl())
            .finish()
    }
}

impl Executor {
    /// Create an executor that runs commands through the shell.
    pub fn new() -> Self {
        Self::with_spawner(Arc::new(ShellSpawner))
    }

    /// Create an executor on top of a custom spawner.
    pub fn with_spawner(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            spawner,
            cache: Arc::new(ResultCache::default()),
            working_dir: None,
            default_timeout: None,
            spawned: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Use the given result cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Run commands in this directory unless a call overrides it.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Apply this timeout to calls that do not set one.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// The shared result cache.
    pub fn result_cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Snapshot of activity counters.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            spawned: self.spawned.load(Ordering::Relaxed),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Execute a command, awaiting its completion.
    pub async fn execute(&self, command: &str, options: &ExecOptions) -> CommandResult {
        if !self.uses_cache(command, options) {
            return self.spawn(command, options).await;
        }

        self.cache.get_or_compute(command, || self.spawn(command, options)).await
    }

    /// Execute a command on the calling thread.
    pub fn execute_blocking(&self, command: &str, options: &ExecOptions) -> CommandResult {
        if !self.uses_cache(command, options) {
            return self.spawn_blocking(command, options);
        }

        self.cache.get_or_compute_blocking(command, || self.spawn_blocking(command, options))
    }

    async fn spawn(&self, command: &str, options: &ExecOptions) -> CommandResult {
        let options = self.effective_options(options);
        tracing::debug!(command = %command, timeout = ?options.timeout, "Executing command");
        self.spawned.fetch_add(1, Ordering::Relaxed);
        let result = self.spawner.spawn(command, &options).await;
        self.report(command, &options, &result);
        result
    }

    fn spawn_blocking(&self, command: &str, options: &ExecOptions) -> CommandResult {
        let options = self.effective_options(options);
        tracing::debug!(command = %command, timeout = ?options.timeout, "Executing command");
        self.spawned.fetch_add(1, Ordering::Relaxed);
        let result = self.spawner.spawn_blocking(command, &options);
        self.report(command, &options, &result);
        result
    }

    fn uses_cache(&self, command: &str, options: &ExecOptions) -> bool {
        !options.disable_cache && !options.stream && self.cache.is_enabled() && is_cacheable(command)
    }

    fn effective_options(&self, options: &ExecOptions) -> ExecOptions {
        let mut options = options.clone();
        if options.working_dir.is_none() {
            options.working_dir.clone_from(&self.working_dir);
        }
        if options.timeout.is_none() {
            options.timeout = self.default_timeout;
        }
        options
    }

    fn report(&self, command: &str, options: &ExecOptions, result: &CommandResult) {
        if result.is_success() {
            tracing::trace!(command = %command, duration = ?result.duration(), "Command succeeded");
            return;
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        let error = result.error().unwrap_or_default();
        if result.is_timed_out() {
            tracing::warn!(command = %command, "Command timed out");
        } else if !options.ignore_error {
            tracing::error!(command = %command, error = %error, "Command failed");
        } else {
            tracing::debug!(command = %command, error = %error, "Command failed (ignored)");
        }

        if options.exit_on_error {
            eprintln!("error: `{command}` failed: {error}");
            std::process::exit(1);
        }
    }
}

/// Get the shell and argument for the current platform.
fn get_shell() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}
