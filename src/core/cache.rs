//! Short-lived memoization of read-only command results.
//!
//! The workflow re-asks git for the branch name and dirty state at several
//! decision points within a few hundred milliseconds. Entries live for a
//! fixed TTL so those repeats skip the subprocess, while the gaps between
//! operator prompts are long enough that nothing stale survives.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::CommandResult;

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3);

/// Command prefixes that only read state and are safe to memoize.
const CACHEABLE_PREFIXES: &[&str] = &[
    "git rev-parse",
    "git branch --show-current",
    "git status",
    "git diff",
    "git log",
    "git stash list",
    "git remote get-url",
    "gh auth status",
    "firebase login:list",
];

/// Check whether a command is a read-only query eligible for caching.
///
/// Anything chained, piped, or redirected is rejected even when it starts
/// with an allowed prefix.
pub fn is_cacheable(command: &str) -> bool {
    let normalized = command.split_whitespace().collect::<Vec<_>>().join(" ");
    if ["&&", "||", ";", "|", ">", "<", "`", "$("].iter().any(|op| normalized.contains(op)) {
        return false;
    }
    CACHEABLE_PREFIXES.iter().any(|prefix| {
        normalized == *prefix
            || normalized.strip_prefix(prefix).is_some_and(|rest| rest.starts_with(' '))
    })
}

/// A memoized command result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The command text (cache key)
    pub command: String,

    /// The result returned by the first invocation
    pub result: CommandResult,

    /// When the result was stored
    pub timestamp: Instant,
}

impl CacheEntry {
    /// Whether the entry is still within `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed() < ttl
    }
}

/// Process-local result cache shared by every executor clone.
#[derive(Debug)]
pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResultCache {
    /// Create a cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::new(Duration::ZERO) }
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether caching is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a fresh entry, evicting it if expired.
    pub fn get(&self, command: &str) -> Option<CommandResult> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        match entries.get(command) {
            Some(entry) if entry.is_fresh(self.ttl) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.remove(command);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result. Failed results are never cached.
    pub fn insert(&self, command: &str, result: &CommandResult) {
        if !self.enabled || !result.is_success() {
            return;
        }
        self.entries.lock().insert(
            command.to_string(),
            CacheEntry {
                command: command.to_string(),
                result: result.clone(),
                timestamp: Instant::now(),
            },
        );
    }

    /// Return the cached result for a cacheable command, or run `compute`.
    ///
    /// Commands rejected by [`is_cacheable`] always run `compute` and are
    /// never stored. The lock is not held while `compute` runs.
    pub async fn get_or_compute<F, Fut>(&self, command: &str, compute: F) -> CommandResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CommandResult>,
    {
        if !is_cacheable(command) {
            return compute().await;
        }
        if let Some(hit) = self.get(command) {
            tracing::debug!(command = %command, "Served from result cache");
            return hit;
        }
        let result = compute().await;
        self.insert(command, &result);
        result
    }

    /// Blocking counterpart of [`get_or_compute`](Self::get_or_compute).
    pub fn get_or_compute_blocking<F>(&self, command: &str, compute: F) -> CommandResult
    where
        F: FnOnce() -> CommandResult,
    {
        if !is_cacheable(command) {
            return compute();
        }
        if let Some(hit) = self.get(command) {
            tracing::debug!(command = %command, "Served from result cache");
            return hit;
        }
        let result = compute();
        self.insert(command, &result);
        result
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        tracing::debug!(dropped, "Result cache cleared");
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that had to run the command.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
