//! Command invocation data structures.
//!
//! Defines [`CommandResult`], the structured outcome of one external
//! command, and [`ExecOptions`], the per-call knobs understood by the
//! [`Executor`](super::Executor).

use std::path::PathBuf;
use std::time::Duration;

/// Outcome of one external command invocation.
///
/// Constructed only through the associated constructors so that
/// `success` never coexists with an error and a timed-out result is
/// never successful. Results are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    success: bool,
    output: String,
    error: Option<String>,
    timed_out: bool,
    exit_code: Option<i32>,
    duration: Duration,
}

impl CommandResult {
    /// A successful invocation with the given standard output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            timed_out: false,
            exit_code: Some(0),
            duration: Duration::ZERO,
        }
    }

    /// A failed invocation.
    ///
    /// An empty `error` is replaced with a message derived from the exit code
    /// so failures always carry a cause.
    pub fn failure(
        output: impl Into<String>,
        error: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            match exit_code {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            error.trim().to_string()
        };

        Self {
            success: false,
            output: output.into(),
            error: Some(error),
            timed_out: false,
            exit_code,
            duration: Duration::ZERO,
        }
    }

    /// A process that did not finish within `timeout`.
    pub fn timed_out(output: impl Into<String>, timeout: Duration) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(format!("timed out after {:.1?}", timeout)),
            timed_out: true,
            exit_code: None,
            duration: timeout,
        }
    }

    /// A process that could not be started at all.
    pub fn spawn_failure(error: impl Into<String>) -> Self {
        Self::failure(String::new(), error, None)
    }

    /// Build a result from raw process output.
    pub fn from_output(exit_code: Option<i32>, stdout: String, stderr: String) -> Self {
        if exit_code == Some(0) {
            Self::success(stdout)
        } else {
            Self::failure(stdout, stderr, exit_code)
        }
    }

    /// Attach the wall-clock time the invocation took.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Whether the command exited with status 0.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Captured standard output (empty when streamed).
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Trimmed standard output.
    pub fn trimmed(&self) -> &str {
        self.output.trim()
    }

    /// Failure cause, absent on success.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the command was killed for exceeding its timeout.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Exit code, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Time taken to execute.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Standard output and error text joined, for pattern matching.
    pub fn combined(&self) -> String {
        match &self.error {
            Some(err) if !self.output.trim().is_empty() => {
                format!("{}\n{}", self.output.trim_end(), err)
            }
            Some(err) => err.clone(),
            None => self.output.clone(),
        }
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Pass stdio through to the terminal instead of capturing it
    pub stream: bool,

    /// Treat a non-zero exit as a silent failure
    pub ignore_error: bool,

    /// Terminate the process when the command fails
    pub exit_on_error: bool,

    /// Bypass the result cache for lookup and storage
    pub disable_cache: bool,

    /// Hard timeout for this invocation
    pub timeout: Option<Duration>,

    /// Working directory (overrides the executor default)
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    /// Capture output, report failures, use the cache when eligible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a quiet query whose failure the caller interprets.
    pub fn query() -> Self {
        Self { ignore_error: true, ..Self::default() }
    }

    /// Options for a mutation, which must always hit the external tool.
    pub fn mutation() -> Self {
        Self { disable_cache: true, ..Self::default() }
    }

    /// Stream output to the terminal.
    #[must_use]
    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Do not report a non-zero exit.
    #[must_use]
    pub fn ignore_error(mut self) -> Self {
        self.ignore_error = true;
        self
    }

    /// Exit the process if the command fails.
    #[must_use]
    pub fn exit_on_error(mut self) -> Self {
        self.exit_on_error = true;
        self
    }

    /// Skip cache lookup and storage.
    #[must_use]
    pub fn fresh(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    /// Set a timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Quote a single argument for inclusion in a shell command string.
///
/// Follows the shell the executor runs commands through: POSIX quoting for
/// `sh -c`, the Windows argument rules for `cmd /C`.
#[cfg(not(windows))]
pub fn quote(arg: &str) -> String {
    shell_words::quote(arg).into_owned()
}

/// Quote a single argument for inclusion in a shell command string.
///
/// Follows the shell the executor runs commands through: POSIX quoting for
/// `sh -c`, the Windows argument rules for `cmd /C`.
#[cfg(windows)]
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_./\\:=@,+".contains(c));
    if plain {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are literal only when doubled.
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}
