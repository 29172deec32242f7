//! Debounced file watching over the project roots.
//!
//! Bursts of filesystem events collapse into one callback after a quiet
//! period. The callback carries no paths: incremental indexing works out
//! what changed from file metadata.

use anyhow::{Context, Result};
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keeps the underlying watcher alive; dropping it stops watching.
pub struct RootWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    watched: Vec<PathBuf>,
}

impl RootWatcher {
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Watch every existing root recursively. `on_change` runs on the watcher
/// thread once per debounced burst that touched a log file.
pub fn watch_roots<F>(roots: &[PathBuf], quiet: Duration, on_change: F) -> Result<RootWatcher>
where
    F: Fn() + Send + 'static,
{
    let mut debouncer = new_debouncer(quiet, move |result: DebounceEventResult| match result {
        Ok(events) => {
            if events.iter().any(|e| is_log_file(&e.path)) {
                tracing::debug!(count = events.len(), "Log files changed");
                on_change();
            }
        }
        Err(error) => tracing::warn!(?error, "File watch error"),
    })
    .context("failed to create file watcher")?;

    let mut watched = Vec::new();
    for root in roots {
        if !root.is_dir() {
            tracing::debug!(root = %root.display(), "Not watching missing root");
            continue;
        }
        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        watched.push(root.clone());
    }

    tracing::info!(roots = watched.len(), "Watching project roots");
    Ok(RootWatcher {
        _debouncer: debouncer,
        watched,
    })
}

fn is_log_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_log_file() {
        assert!(is_log_file(Path::new("/p/-a-b/s1.jsonl")));
        assert!(!is_log_file(Path::new("/p/-a-b/s1.jsonl.tmp")));
        assert!(!is_log_file(Path::new("/p/-a-b")));
    }
}
