//! Indexing pipeline
//!
//! Turns session logs on disk into indexed rows and feeds newly inserted
//! messages to the watch engine.
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Project roots  │ ──► │ IndexCoordinator │ ──► │    Database     │
//! │ (~/.claude/...) │     │                  │     │ (files, msgs..) │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                        ┌──────────────┐
//!                        │ WatchEngine  │
//!                        │  match_new   │
//!                        └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clog_core::{Config, Database};
//! use clog_core::ingest::IndexCoordinator;
//! use std::sync::Arc;
//!
//! let config = Config::load()?;
//! let db = Arc::new(Database::open(&Config::database_path())?);
//! db.migrate()?;
//!
//! let coordinator = IndexCoordinator::new(db, config.project_roots());
//! let summary = coordinator.index_changed()?;
//! println!("Indexed {} of {} files", summary.files_indexed, summary.files_discovered);
//! ```

pub mod discovery;
pub mod parser;
pub mod worker;

pub use discovery::{decode_project_dir, Discovery};
pub use parser::{parse_file, parse_line};
pub use worker::{IndexEvent, IndexRequest, IndexWorker};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::DiscoveredFile;
use crate::watch::WatchEngine;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Stage of an indexing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Discovering,
    Indexing,
    Done,
}

/// Progress report posted while a pass runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProgress {
    pub phase: IndexPhase,
    /// Files handled so far in this pass
    pub current: usize,
    /// Files this pass will handle
    pub total: usize,
    /// File about to be indexed
    pub file: Option<PathBuf>,
}

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    /// Number of files found under the roots
    pub files_discovered: usize,
    /// Number of files replaced in the store
    pub files_indexed: usize,
    /// Number of files left alone because their metadata was unchanged
    pub files_skipped: usize,
    /// Files that could not be indexed (path, error message)
    pub failures: Vec<(PathBuf, String)>,
    /// Number of message rows inserted
    pub messages_inserted: usize,
    /// Number of watch matches recorded for the inserted messages
    pub new_matches: usize,
}

impl IndexSummary {
    /// Whether this pass changed anything in the store
    pub fn changed(&self) -> bool {
        self.files_indexed > 0
    }
}

/// Runs indexing passes over the configured project roots.
///
/// Whole passes are serialized: a second caller waits for the running
/// pass to finish rather than interleaving with it.
pub struct IndexCoordinator {
    db: Arc<Database>,
    watch: WatchEngine,
    discovery: Discovery,
    roots: Vec<PathBuf>,
    pass: Mutex<()>,
}

impl IndexCoordinator {
    pub fn new(db: Arc<Database>, roots: Vec<PathBuf>) -> Self {
        let watch = WatchEngine::new(Arc::clone(&db));
        Self::with_watch(db, watch, roots)
    }

    pub fn with_watch(db: Arc<Database>, watch: WatchEngine, roots: Vec<PathBuf>) -> Self {
        Self {
            db,
            watch,
            discovery: Discovery::new(),
            roots,
            pass: Mutex::new(()),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn watch(&self) -> &WatchEngine {
        &self.watch
    }

    /// Discover log files without indexing them.
    pub fn discover_files(&self) -> Result<Vec<DiscoveredFile>> {
        self.discovery.discover(&self.roots)
    }

    /// Replace every discovered file unconditionally.
    pub fn index_all(&self) -> Result<IndexSummary> {
        self.index_all_with_progress(|_| {})
    }

    /// Full pass with a progress callback invoked before each file.
    ///
    /// ## Example
    ///
    /// ```rust,ignore
    /// coordinator.index_all_with_progress(|p| {
    ///     println!("{}/{}", p.current + 1, p.total);
    /// })?;
    /// ```
    pub fn index_all_with_progress<F>(&self, on_progress: F) -> Result<IndexSummary>
    where
        F: FnMut(&IndexProgress),
    {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        self.run_pass(false, on_progress)
    }

    /// Replace only files whose (mtime, size) differ from what is stored.
    pub fn index_changed(&self) -> Result<IndexSummary> {
        self.index_changed_with_progress(|_| {})
    }

    pub fn index_changed_with_progress<F>(&self, on_progress: F) -> Result<IndexSummary>
    where
        F: FnMut(&IndexProgress),
    {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        self.run_pass(true, on_progress)
    }

    /// Empty the store, then run a full pass.
    pub fn reset_and_index_with_progress<F>(&self, on_progress: F) -> Result<IndexSummary>
    where
        F: FnMut(&IndexProgress),
    {
        let _pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        self.db.reset()?;
        tracing::info!("Index reset");
        self.run_pass(false, on_progress)
    }

    /// Parse one file and replace its stored generation.
    ///
    /// Returns the ids of the inserted messages.
    pub fn index_file(&self, file: &DiscoveredFile) -> Result<Vec<i64>> {
        let events = parser::parse_file(&file.path).map_err(|e| Error::Index {
            path: file.path.clone(),
            message: e.to_string(),
        })?;
        self.db.replace_file(file, &events)
    }

    fn run_pass<F>(&self, incremental: bool, mut on_progress: F) -> Result<IndexSummary>
    where
        F: FnMut(&IndexProgress),
    {
        on_progress(&IndexProgress {
            phase: IndexPhase::Discovering,
            current: 0,
            total: 0,
            file: None,
        });

        let files = self.discover_files()?;
        let mut summary = IndexSummary {
            files_discovered: files.len(),
            ..Default::default()
        };

        let pending: Vec<&DiscoveredFile> = if incremental {
            let stored = self.db.file_states()?;
            files
                .iter()
                .filter(|f| stored.get(&f.path) != Some(&f.state()))
                .collect()
        } else {
            files.iter().collect()
        };
        summary.files_skipped = files.len() - pending.len();

        let total = pending.len();
        let mut inserted = Vec::new();

        for (i, file) in pending.iter().enumerate() {
            on_progress(&IndexProgress {
                phase: IndexPhase::Indexing,
                current: i,
                total,
                file: Some(file.path.clone()),
            });

            match self.index_file(file) {
                Ok(ids) => {
                    tracing::debug!(
                        path = %file.path.display(),
                        count = ids.len(),
                        "File indexed"
                    );
                    summary.files_indexed += 1;
                    summary.messages_inserted += ids.len();
                    inserted.extend(ids);
                }
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "Failed to index file");
                    summary.failures.push((file.path.clone(), e.to_string()));
                }
            }
        }

        if !inserted.is_empty() {
            match self.watch.match_new(&inserted) {
                Ok(n) => summary.new_matches = n,
                Err(e) => tracing::warn!(error = %e, "Watch matching failed"),
            }
        }

        on_progress(&IndexProgress {
            phase: IndexPhase::Done,
            current: total,
            total,
            file: None,
        });

        tracing::info!(
            incremental,
            files_discovered = summary.files_discovered,
            files_indexed = summary.files_indexed,
            files_skipped = summary.files_skipped,
            failures = summary.failures.len(),
            messages_inserted = summary.messages_inserted,
            new_matches = summary.new_matches,
            "Index pass complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const SESSION: &str = concat!(
        r#"{"type":"user","uuid":"u1","timestamp":"2025-01-01T00:00:00Z","message":{"role":"user","content":"please deploy"}}"#,
        "\n",
        r#"{"type":"assistant","uuid":"a1","timestamp":"2025-01-01T00:00:01Z","message":{"model":"claude-sonnet-4","content":[{"type":"text","text":"deploying"}],"usage":{"input_tokens":10,"output_tokens":5}}}"#,
        "\n",
    );

    fn write_session(root: &Path, project: &str, name: &str, body: &str) -> PathBuf {
        let dir = root.join(project);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.jsonl", name));
        fs::write(&path, body).unwrap();
        path
    }

    fn coordinator(root: &Path) -> IndexCoordinator {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        IndexCoordinator::new(db, vec![root.to_path_buf()])
    }

    #[test]
    fn test_full_pass_indexes_everything() {
        let temp = TempDir::new().unwrap();
        write_session(temp.path(), "-tmp-app", "s1", SESSION);
        write_session(temp.path(), "-tmp-app", "s2", SESSION);
        let coordinator = coordinator(temp.path());

        let summary = coordinator.index_all().unwrap();
        assert_eq!(summary.files_discovered, 2);
        assert_eq!(summary.files_indexed, 2);
        assert_eq!(summary.messages_inserted, 4);

        let again = coordinator.index_all().unwrap();
        assert_eq!(again.files_indexed, 2);
        assert_eq!(coordinator.database().message_count().unwrap(), 4);
    }

    #[test]
    fn test_incremental_skips_unchanged() {
        let temp = TempDir::new().unwrap();
        write_session(temp.path(), "-tmp-app", "s1", SESSION);
        let coordinator = coordinator(temp.path());

        assert_eq!(coordinator.index_changed().unwrap().files_indexed, 1);
        let second = coordinator.index_changed().unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_skipped, 1);
        assert!(!second.changed());

        write_session(temp.path(), "-tmp-app", "s2", SESSION);
        let third = coordinator.index_changed().unwrap();
        assert_eq!(third.files_indexed, 1);
        assert_eq!(third.files_skipped, 1);
    }

    #[test]
    fn test_missing_file_is_index_error() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(temp.path());
        let file = DiscoveredFile {
            path: temp.path().join("gone.jsonl"),
            project: "app".to_string(),
            session_id: "gone".to_string(),
            modified_ms: 0,
            size: 0,
        };

        let err = coordinator.index_file(&file).unwrap_err();
        assert!(matches!(err, Error::Index { ref path, .. } if path.ends_with("gone.jsonl")));
        assert_eq!(coordinator.database().file_count().unwrap(), 0);
    }

    #[test]
    fn test_progress_reports_each_file() {
        let temp = TempDir::new().unwrap();
        write_session(temp.path(), "-tmp-app", "s1", SESSION);
        write_session(temp.path(), "-tmp-app", "s2", SESSION);
        let coordinator = coordinator(temp.path());

        let mut seen = Vec::new();
        coordinator
            .index_all_with_progress(|p| seen.push((p.phase, p.current, p.total)))
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (IndexPhase::Discovering, 0, 0),
                (IndexPhase::Indexing, 0, 2),
                (IndexPhase::Indexing, 1, 2),
                (IndexPhase::Done, 2, 2),
            ]
        );
    }

    #[test]
    fn test_new_messages_are_watched() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(temp.path());
        coordinator
            .watch()
            .add_subscription("deploys", "deploy", "")
            .unwrap();

        write_session(temp.path(), "-tmp-app", "s1", SESSION);
        let summary = coordinator.index_changed().unwrap();
        assert_eq!(summary.new_matches, 2);
        assert_eq!(coordinator.watch().total_unseen().unwrap(), 2);
    }

    #[test]
    fn test_reset_and_index() {
        let temp = TempDir::new().unwrap();
        let path = write_session(temp.path(), "-tmp-app", "s1", SESSION);
        let coordinator = coordinator(temp.path());
        coordinator.index_all().unwrap();

        fs::remove_file(path).unwrap();
        write_session(temp.path(), "-tmp-app", "s2", SESSION);
        let summary = coordinator.reset_and_index_with_progress(|_| {}).unwrap();
        assert_eq!(summary.files_indexed, 1);
        assert_eq!(coordinator.database().file_count().unwrap(), 1);
    }

    #[test]
    fn test_no_roots_fails() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let coordinator = IndexCoordinator::new(db, Vec::new());
        assert!(matches!(coordinator.index_all(), Err(Error::Discovery(_))));
    }
}
