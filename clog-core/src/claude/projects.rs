//! Project directories and their session listings
//!
//! The assistant may keep a `sessions-index.json` next to a project's logs.
//! When present it is authoritative for the listing: sidechain sessions
//! (subagent transcripts) are left out and the rest are ordered by file
//! modification time. Without it the logs themselves are scanned.

use crate::db::repo::MAX_PROMPT_CHARS;
use crate::error::{Error, Result};
use crate::ingest::discovery::resolve_project_path;
use crate::ingest::parse_file;
use crate::types::EventKind;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Session listing kept by the assistant in each project directory
pub const SESSIONS_INDEX_FILE: &str = "sessions-index.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsIndex {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub entries: Vec<SessionEntry>,
}

/// One session as listed in `sessions-index.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionEntry {
    pub session_id: String,
    pub full_path: String,
    /// Log modification time in unix milliseconds
    pub file_mtime: i64,
    pub first_prompt: String,
    pub message_count: i64,
    pub created: String,
    pub modified: String,
    pub git_branch: String,
    pub project_path: String,
    pub is_sidechain: bool,
}

/// A project directory under one of the roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    /// Last component of `path`
    pub name: String,
    /// Working directory the project was recorded in
    pub path: String,
    /// Directory name under the root, e.g. `-Users-jane-dev-app`
    pub encoded_name: String,
    pub data_dir: PathBuf,
    /// Sessions that are not sidechains
    pub session_count: usize,
    /// Newest log, unix milliseconds
    pub last_modified_ms: i64,
}

/// Read `<data_dir>/sessions-index.json`. `Ok(None)` when there is none.
pub fn load_sessions_index(data_dir: &Path) -> Result<Option<SessionsIndex>> {
    let path = data_dir.join(SESSIONS_INDEX_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Index entries for `data_dir`, or `None` when the index is missing or
/// unreadable.
fn index_entries(data_dir: &Path) -> Option<Vec<SessionEntry>> {
    match load_sessions_index(data_dir) {
        Ok(index) => index.map(|i| i.entries),
        Err(e) => {
            tracing::warn!(dir = %data_dir.display(), error = %e, "Ignoring unreadable sessions index");
            None
        }
    }
}

/// Sessions of one project directory, newest first, sidechains excluded.
///
/// Uses the sessions index when there is one; otherwise every log directly
/// in `data_dir` or one directory below it is parsed, and logs without a
/// single message are left out.
pub fn load_sessions(data_dir: &Path) -> Result<Vec<SessionEntry>> {
    let mut sessions = match index_entries(data_dir) {
        Some(entries) => entries.into_iter().filter(|e| !e.is_sidechain).collect(),
        None => scan_logs(data_dir)?,
    };
    sessions.sort_by(|a, b| b.file_mtime.cmp(&a.file_mtime));
    Ok(sessions)
}

fn scan_logs(data_dir: &Path) -> Result<Vec<SessionEntry>> {
    let mut sessions = Vec::new();
    for path in log_files(data_dir)? {
        match session_from_log(&path) {
            Ok(Some(entry)) => sessions.push(entry),
            Ok(None) => {}
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable log"),
        }
    }
    Ok(sessions)
}

/// `*.jsonl` files in `dir` and in its immediate subdirectories.
fn log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let is_log = |p: &Path| p.is_file() && p.extension().is_some_and(|e| e == "jsonl");

    let mut logs = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if is_log(&path) {
            logs.push(path);
        } else if path.is_dir() {
            let Ok(sub) = std::fs::read_dir(&path) else {
                continue;
            };
            logs.extend(sub.flatten().map(|e| e.path()).filter(|p| is_log(p)));
        }
    }
    Ok(logs)
}

fn session_from_log(path: &Path) -> Result<Option<SessionEntry>> {
    let meta = std::fs::metadata(path)?;
    let events = parse_file(path)?;

    let mut entry = SessionEntry {
        session_id: path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
        full_path: path.to_string_lossy().to_string(),
        file_mtime: modified_ms(&meta),
        modified: meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default(),
        ..Default::default()
    };

    for event in events.iter().filter(|e| e.kind.is_stored()) {
        entry.message_count += 1;
        if entry.created.is_empty() {
            if let Some(ts) = &event.timestamp {
                entry.created = ts.clone();
            }
        }
        if entry.first_prompt.is_empty() && event.kind == EventKind::User {
            entry.first_prompt = event.text.chars().take(MAX_PROMPT_CHARS).collect();
        }
        if entry.git_branch.is_empty() {
            entry.git_branch = event.git_branch.clone().unwrap_or_default();
        }
        if entry.project_path.is_empty() {
            entry.project_path = event.cwd.clone().unwrap_or_default();
        }
    }

    Ok((entry.message_count > 0).then_some(entry))
}

fn modified_ms(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Session count and newest mtime of a project directory.
fn project_activity(data_dir: &Path) -> (usize, i64) {
    if let Some(entries) = index_entries(data_dir) {
        let count = entries.iter().filter(|e| !e.is_sidechain).count();
        let last = entries.iter().map(|e| e.file_mtime).max().unwrap_or(0);
        return (count, last);
    }

    let logs = log_files(data_dir).unwrap_or_default();
    let last = logs
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| modified_ms(&m))
        .max()
        .unwrap_or(0);
    (logs.len(), last)
}

/// Every project with at least one session, most recently active first.
///
/// A project that appears under more than one root is listed once, from
/// the root where it was modified most recently.
pub fn discover_projects(roots: &[PathBuf]) -> Vec<Project> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut projects: Vec<Project> = Vec::new();

    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            tracing::debug!(root = %root.display(), "Skipping unreadable project root");
            continue;
        };

        for entry in entries.flatten() {
            let data_dir = entry.path();
            if !data_dir.is_dir() {
                continue;
            }

            let (session_count, last_modified_ms) = project_activity(&data_dir);
            if session_count == 0 {
                continue;
            }

            let path = resolve_project_path(&data_dir);
            let project = Project {
                name: Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.clone()),
                encoded_name: entry.file_name().to_string_lossy().to_string(),
                path,
                data_dir,
                session_count,
                last_modified_ms,
            };

            match seen.get(&project.path) {
                Some(&i) => {
                    if project.last_modified_ms > projects[i].last_modified_ms {
                        projects[i] = project;
                    }
                }
                None => {
                    seen.insert(project.path.clone(), projects.len());
                    projects.push(project);
                }
            }
        }
    }

    projects.sort_by(|a, b| {
        b.last_modified_ms
            .cmp(&a.last_modified_ms)
            .then_with(|| a.name.cmp(&b.name))
    });
    projects
}

/// Look a project up by name, recorded path, or encoded directory name.
pub fn find_project(roots: &[PathBuf], query: &str) -> Option<Project> {
    let query = query.trim_end_matches('/');
    discover_projects(roots)
        .into_iter()
        .find(|p| p.name == query || p.path == query || p.encoded_name == query)
}

/// Ids flagged as sidechains in any project's sessions index.
pub fn sidechain_sessions(roots: &[PathBuf]) -> HashSet<String> {
    let mut ids = HashSet::new();
    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        for entry in entries.flatten() {
            let Some(listed) = index_entries(&entry.path()) else {
                continue;
            };
            ids.extend(
                listed
                    .into_iter()
                    .filter(|e| e.is_sidechain)
                    .map(|e| e.session_id),
            );
        }
    }
    ids
}
