//! Log file discovery
//!
//! Each project root holds one directory per project. Session logs sit either
//! directly in the project directory or one level below it (UUID-bucketed
//! layout):
//!
//! ```text
//! <root>/-Users-jane-dev-app/3f2a....jsonl
//! <root>/-Users-jane-dev-app/<uuid>/9b1c....jsonl
//! ```
//!
//! A session id (the file stem) is reported once. When the same session
//! shows up twice, because a log moved into a bucket or a project sits
//! under more than one root, the most recently modified copy wins.
//!
//! Discovery only stats files. The one exception is naming a project whose
//! encoded directory name does not decode to an existing path; then the
//! `cwd` recorded in the first lines of one of its logs is used, once per
//! directory, and cached.

use crate::error::{Error, Result};
use crate::types::DiscoveredFile;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::UNIX_EPOCH;

/// How many leading lines are inspected for a `cwd` field.
const CWD_SCAN_LINES: usize = 5;

/// File discovery with a per-directory project name cache.
#[derive(Debug, Default)]
pub struct Discovery {
    names: Mutex<HashMap<PathBuf, String>>,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate session logs under every root, one per session id, sorted
    /// by path.
    ///
    /// Missing roots are skipped. Fails only if `roots` is empty, or if no
    /// root could be read and at least one failed for a reason other than
    /// not existing.
    pub fn discover(&self, roots: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
        if roots.is_empty() {
            return Err(Error::Discovery("no project roots configured".to_string()));
        }

        let mut files = Vec::new();
        let mut readable = 0usize;
        let mut failures = Vec::new();

        for root in roots {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(root = %root.display(), "Project root missing, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Cannot read project root");
                    failures.push(format!("{}: {}", root.display(), e));
                    continue;
                }
            };
            readable += 1;

            for entry in entries.flatten() {
                let project_dir = entry.path();
                if !project_dir.is_dir() {
                    continue;
                }
                self.scan_project(&project_dir, &mut files);
            }
        }

        if readable == 0 && !failures.is_empty() {
            return Err(Error::Discovery(failures.join("; ")));
        }

        let mut files = newest_per_session(files);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(count = files.len(), "Discovered log files");
        Ok(files)
    }

    fn scan_project(&self, project_dir: &Path, out: &mut Vec<DiscoveredFile>) {
        let Some(dir_str) = project_dir.to_str() else {
            tracing::warn!(dir = %project_dir.display(), "Skipping non-UTF-8 project directory");
            return;
        };
        let escaped = glob::Pattern::escape(dir_str);
        let mut project: Option<String> = None;

        for pattern in [
            format!("{}/*.jsonl", escaped),
            format!("{}/*/*.jsonl", escaped),
        ] {
            let paths = match glob::glob(&pattern) {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Invalid glob pattern");
                    continue;
                }
            };

            for path in paths.flatten() {
                let Ok(meta) = std::fs::metadata(&path) else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let Some(session_id) = path.file_stem().map(|s| s.to_string_lossy().to_string())
                else {
                    continue;
                };

                let project = project
                    .get_or_insert_with(|| self.project_name(project_dir))
                    .clone();
                let modified_ms = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);

                out.push(DiscoveredFile {
                    path,
                    project,
                    session_id,
                    modified_ms,
                    size: meta.len() as i64,
                });
            }
        }
    }

    /// Display name for a project directory, cached per directory.
    fn project_name(&self, project_dir: &Path) -> String {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        names
            .entry(project_dir.to_path_buf())
            .or_insert_with(|| resolve_project_name(project_dir))
            .clone()
    }
}

/// Keep one file per session id: newest mtime, then largest size, then the
/// first seen (earlier roots come first).
fn newest_per_session(files: Vec<DiscoveredFile>) -> Vec<DiscoveredFile> {
    let mut by_session: HashMap<String, DiscoveredFile> = HashMap::with_capacity(files.len());
    for file in files {
        let superseded = by_session
            .get(&file.session_id)
            .is_some_and(|kept| (kept.modified_ms, kept.size) >= (file.modified_ms, file.size));
        if superseded {
            tracing::debug!(path = %file.path.display(), "Skipping duplicate session log");
            continue;
        }
        by_session.insert(file.session_id.clone(), file);
    }
    by_session.into_values().collect()
}

/// Convenience wrapper for one-off discovery without a name cache.
pub fn discover(roots: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
    Discovery::new().discover(roots)
}

/// Decode an encoded project directory name: `-Users-jane-dev-app` becomes
/// `/Users/jane/dev/app`.
///
/// Lossy when the original path contained hyphens.
pub fn decode_project_dir(encoded: &str) -> String {
    if encoded.is_empty() {
        return String::new();
    }
    let body = encoded.strip_prefix('-').unwrap_or(encoded);
    format!("/{}", body.replace('-', "/"))
}

/// The working directory a project directory stands for: the decoded name if
/// that path exists, otherwise the `cwd` recorded in one of its logs.
pub fn resolve_project_path(project_dir: &Path) -> String {
    let decoded = decode_project_dir(&encoded_name(project_dir));
    if Path::new(&decoded).exists() {
        decoded
    } else {
        cwd_from_dir(project_dir).unwrap_or(decoded)
    }
}

fn encoded_name(project_dir: &Path) -> String {
    project_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn resolve_project_name(project_dir: &Path) -> String {
    let real = resolve_project_path(project_dir);
    Path::new(&real)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| encoded_name(project_dir))
}

/// First `cwd` found in a log directly under `dir`, then in its subdirectories.
fn cwd_from_dir(dir: &Path) -> Option<String> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .collect();
    entries.sort();

    let is_log = |p: &Path| p.is_file() && p.extension().is_some_and(|e| e == "jsonl");

    if let Some(cwd) = entries.iter().filter(|p| is_log(p)).find_map(|p| cwd_from_file(p)) {
        return Some(cwd);
    }

    entries.iter().filter(|p| p.is_dir()).find_map(|sub| {
        let mut logs: Vec<PathBuf> = std::fs::read_dir(sub)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| is_log(p))
            .collect();
        logs.sort();
        logs.iter().find_map(|p| cwd_from_file(p))
    })
}

fn cwd_from_file(path: &Path) -> Option<String> {
    #[derive(Deserialize)]
    struct CwdLine {
        #[serde(default)]
        cwd: String,
    }

    let reader = BufReader::new(File::open(path).ok()?);
    reader
        .split(b'\n')
        .take(CWD_SCAN_LINES)
        .flatten()
        .filter_map(|line| serde_json::from_slice::<CwdLine>(&line).ok())
        .map(|line| line.cwd)
        .find(|cwd| !cwd.is_empty())
}
