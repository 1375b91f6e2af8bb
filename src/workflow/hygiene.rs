//! Repository hygiene.
//!
//! Two independent chores run side by side through the parallel runner:
//! making sure `.gitignore` covers generated files, and pruning stale
//! temp files left behind by earlier runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::core::{run_parallel, HygieneSettings, Operation};

const IGNORE_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build", ".next"];

/// What the hygiene pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HygieneReport {
    /// Lines appended to `.gitignore`
    pub gitignore_added: Vec<String>,
    /// Temp files deleted
    pub pruned: Vec<PathBuf>,
}

impl HygieneReport {
    /// Whether anything changed.
    pub fn is_empty(&self) -> bool {
        self.gitignore_added.is_empty() && self.pruned.is_empty()
    }

    /// One-line description for the progress tracker.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "nothing to clean".to_string();
        }
        let mut parts = Vec::new();
        if !self.gitignore_added.is_empty() {
            parts.push(format!("{} .gitignore entr(ies) added", self.gitignore_added.len()));
        }
        if !self.pruned.is_empty() {
            parts.push(format!("{} temp file(s) removed", self.pruned.len()));
        }
        parts.join(", ")
    }
}

enum Chore {
    Gitignore(Vec<String>),
    Pruned(Vec<PathBuf>),
}

/// Append any missing `entries` to `<root>/.gitignore`.
///
/// Returns the entries that were added. A missing file is created.
pub fn ensure_gitignore(root: &Path, entries: &[String]) -> anyhow::Result<Vec<String>> {
    let path = root.join(".gitignore");
    let mut content = if path.exists() { fs::read_to_string(&path)? } else { String::new() };

    let missing: Vec<String> = entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .filter(|entry| !content.lines().any(|line| line.trim() == *entry))
        .map(str::to_string)
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for entry in &missing {
        content.push_str(entry);
        content.push('\n');
    }
    fs::write(&path, content)?;
    tracing::debug!(path = %path.display(), added = missing.len(), "Updated .gitignore");
    Ok(missing)
}

/// Delete files under `root` whose name matches one of `patterns` and
/// that were last modified at least `max_age` ago.
pub fn prune_temp_files(
    root: &Path,
    patterns: &[String],
    max_age: Duration,
) -> anyhow::Result<Vec<PathBuf>> {
    let patterns = patterns
        .iter()
        .map(|p| glob::Pattern::new(p))
        .collect::<Result<Vec<_>, _>>()?;
    if patterns.is_empty() {
        return Ok(Vec::new());
    }

    let now = SystemTime::now();
    let mut pruned = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !IGNORE_DIRS.iter().any(|d| name == *d)
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if !patterns.iter().any(|p| p.matches(&name)) {
            continue;
        }
        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => pruned.push(entry.path().to_path_buf()),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Could not remove temp file");
            }
        }
    }
    Ok(pruned)
}

/// Run both chores concurrently on the blocking pool.
pub async fn run_hygiene(root: &Path, settings: &HygieneSettings) -> anyhow::Result<HygieneReport> {
    let gitignore = {
        let root = root.to_path_buf();
        let entries = settings.gitignore_entries.clone();
        async move {
            let added = tokio::task::spawn_blocking(move || ensure_gitignore(&root, &entries)).await??;
            Ok::<_, anyhow::Error>(Chore::Gitignore(added))
        }
    };
    let prune = {
        let root = root.to_path_buf();
        let patterns = settings.temp_patterns.clone();
        let max_age = settings.temp_max_age();
        async move {
            let pruned =
                tokio::task::spawn_blocking(move || prune_temp_files(&root, &patterns, max_age))
                    .await??;
            Ok::<_, anyhow::Error>(Chore::Pruned(pruned))
        }
    };

    let operations: Vec<Operation<'_, Chore, anyhow::Error>> =
        vec![Box::pin(gitignore), Box::pin(prune)];

    let mut report = HygieneReport::default();
    for chore in run_parallel(operations, "repo hygiene").await? {
        match chore {
            Chore::Gitignore(added) => report.gitignore_added = added,
            Chore::Pruned(pruned) => report.pruned = pruned,
        }
    }
    Ok(report)
}
