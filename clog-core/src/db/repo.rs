//! Database repository layer
//!
//! Owns the connection and the application-level reader/writer gate, and
//! provides file replacement, reset, and session/statistics reads.

use crate::error::{Error, Result};
use crate::format::format_model;
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stored message text is capped at this many characters.
pub const MAX_MESSAGE_CHARS: usize = 50_000;

/// Session first prompts are capped at this many characters.
pub const MAX_PROMPT_CHARS: usize = 120;

/// Database handle.
///
/// Mutations go through [`Database::write`], which holds the gate
/// exclusively; query paths use [`Database::read`], which shares it.
///
/// There is a single connection behind a mutex, so reads still run one at a
/// time. The gate only keeps queries out while a writer holds the
/// connection across a transaction.
pub struct Database {
    gate: RwLock<()>,
    conn: Mutex<Connection>,
}

/// Shared access to the connection. Excludes writers while held.
pub struct ReadHandle<'a> {
    conn: MutexGuard<'a, Connection>,
    _gate: RwLockReadGuard<'a, ()>,
}

/// Exclusive access to the connection for mutations.
pub struct WriteHandle<'a> {
    conn: MutexGuard<'a, Connection>,
    _gate: RwLockWriteGuard<'a, ()>,
}

impl Deref for ReadHandle<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Deref for WriteHandle<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for WriteHandle<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            gate: RwLock::new(()),
            conn: Mutex::new(conn),
        }
    }

    /// Create the schema if needed
    pub fn migrate(&self) -> Result<()> {
        let conn = self.write();
        super::schema::run_migrations(&conn)
    }

    /// Shared access for queries
    pub fn read(&self) -> ReadHandle<'_> {
        let gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        ReadHandle { conn, _gate: gate }
    }

    /// Exclusive access for mutations
    pub fn write(&self) -> WriteHandle<'_> {
        let gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        WriteHandle { conn, _gate: gate }
    }

    // ============================================
    // File replacement
    // ============================================

    /// Atomically replace everything stored for `file` with `events`.
    ///
    /// Prior rows for the path (file, messages, session, and through the
    /// message cascade any watch matches) are deleted and the new generation
    /// inserted in one transaction. Marker events are dropped. Returns the
    /// ids of the inserted messages in insertion order.
    ///
    /// A session id belongs to one file. If another path already holds it
    /// (the log moved between layouts, or the project sits under two roots),
    /// that file is superseded when it is gone from disk or not newer than
    /// `file`; otherwise this fails with [`Error::Index`] and nothing changes.
    pub fn replace_file(&self, file: &DiscoveredFile, events: &[Event]) -> Result<Vec<i64>> {
        let mut conn = self.write();
        let tx = conn.transaction()?;
        let path = file.path.to_string_lossy().to_string();

        let old_id: Option<i64> = tx
            .query_row("SELECT id FROM files WHERE path = ?", [&path], |r| r.get(0))
            .optional()?;
        if let Some(old_id) = old_id {
            delete_file_rows(&tx, old_id)?;
        }

        let owner: Option<(i64, String, i64)> = tx
            .query_row(
                r#"
                SELECT f.id, f.path, f.mtime
                FROM sessions s
                JOIN files f ON f.id = s.file_id
                WHERE s.session_id = ?
                "#,
                [&file.session_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        if let Some((owner_id, owner_path, owner_mtime)) = owner {
            if owner_mtime > file.modified_ms && Path::new(&owner_path).exists() {
                return Err(Error::Index {
                    path: file.path.clone(),
                    message: format!(
                        "session {} is already indexed from newer file {}",
                        file.session_id, owner_path
                    ),
                });
            }
            tracing::debug!(
                session_id = %file.session_id,
                from = %owner_path,
                to = %file.path.display(),
                "Session moved to another file"
            );
            delete_file_rows(&tx, owner_id)?;
        }

        tx.execute(
            r#"
            INSERT INTO files (path, project, session_id, mtime, size, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                path,
                file.project,
                file.session_id,
                file.modified_ms,
                file.size,
                now_rfc3339(),
            ],
        )?;
        let file_id = tx.last_insert_rowid();

        let stored: Vec<&Event> = events.iter().filter(|e| e.kind.is_stored()).collect();
        let mut ids = Vec::with_capacity(stored.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO messages (file_id, session_id, type, timestamp, model, text,
                                      tool_calls, input_tokens, output_tokens)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for event in &stored {
                stmt.execute(params![
                    file_id,
                    file.session_id,
                    event.kind.as_str(),
                    event.timestamp.as_deref().unwrap_or(""),
                    event.model.as_deref().unwrap_or(""),
                    clamp_text(&event.text),
                    event.tool_calls.join(", "),
                    event.input_tokens,
                    event.output_tokens,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }

        let agg = SessionAggregate::from_events(&stored);
        tx.execute(
            r#"
            INSERT INTO sessions (session_id, file_id, project, first_prompt, git_branch, model,
                                  created_at, modified_at, message_count, total_input_tokens,
                                  total_output_tokens, tool_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                file.session_id,
                file_id,
                file.project,
                agg.first_prompt,
                agg.git_branch,
                agg.model,
                agg.created_at,
                agg.modified_at,
                agg.message_count,
                agg.total_input_tokens,
                agg.total_output_tokens,
                agg.tool_count,
            ],
        )?;

        tx.commit()?;

        tracing::debug!(
            path = %file.path.display(),
            messages = ids.len(),
            replaced = old_id.is_some(),
            "Replaced file"
        );
        Ok(ids)
    }

    /// Delete every row in every table and rebuild the full-text index.
    pub fn reset(&self) -> Result<()> {
        let mut conn = self.write();
        let tx = conn.transaction()?;
        for table in [
            "watchlist_matches",
            "watchlist",
            "messages",
            "sessions",
            "files",
        ] {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.execute("INSERT INTO messages_fts(messages_fts) VALUES('rebuild')", [])?;
        tx.commit()?;

        tracing::info!("Index reset");
        Ok(())
    }

    // ============================================
    // File state
    // ============================================

    /// Stored (mtime, size) for a path, if it has been indexed
    pub fn file_state(&self, path: &Path) -> Result<Option<FileState>> {
        let conn = self.read();
        conn.query_row(
            "SELECT mtime, size FROM files WHERE path = ?",
            [path.to_string_lossy().to_string()],
            |row| {
                Ok(FileState {
                    modified_ms: row.get(0)?,
                    size: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    /// Stored state for every indexed path
    pub fn file_states(&self) -> Result<HashMap<PathBuf, FileState>> {
        let conn = self.read();
        let mut stmt = conn.prepare("SELECT path, mtime, size FROM files")?;
        let states = stmt
            .query_map([], |row| {
                let path: String = row.get(0)?;
                Ok((
                    PathBuf::from(path),
                    FileState {
                        modified_ms: row.get(1)?,
                        size: row.get(2)?,
                    },
                ))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(states)
    }

    // ============================================
    // Sessions
    // ============================================

    /// Get a session by id
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let conn = self.read();
        conn.query_row(
            &format!("{} WHERE s.session_id = ?", SESSION_SELECT),
            [session_id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Sessions in a project, most recently modified first
    pub fn sessions_by_project(&self, project: &str) -> Result<Vec<SessionSummary>> {
        let conn = self.read();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE s.project = ? ORDER BY s.modified_at DESC",
            SESSION_SELECT
        ))?;
        let sessions = stmt
            .query_map([project], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Sessions with the given ids, most recently modified first.
    /// Unknown ids are ignored.
    pub fn sessions_by_ids(&self, ids: &[String]) -> Result<Vec<SessionSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "{} WHERE s.session_id IN ({}) ORDER BY s.modified_at DESC",
            SESSION_SELECT, placeholders
        ))?;
        let sessions = stmt
            .query_map(
                rusqlite::params_from_iter(ids.iter()),
                Self::row_to_session,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Project names with their session counts, busiest first
    pub fn list_projects(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.read();
        let mut stmt = conn.prepare(
            "SELECT project, COUNT(*) AS n FROM sessions GROUP BY project ORDER BY n DESC, project",
        )?;
        let projects = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    pub(crate) fn row_to_session(row: &Row) -> rusqlite::Result<SessionSummary> {
        let path: String = row.get("path")?;
        Ok(SessionSummary {
            session_id: row.get("session_id")?,
            path: PathBuf::from(path),
            project: row.get("project")?,
            first_prompt: row.get("first_prompt")?,
            git_branch: row.get("git_branch")?,
            model: row.get("model")?,
            created_at: row.get("created_at")?,
            modified_at: row.get("modified_at")?,
            message_count: row.get("message_count")?,
            total_input_tokens: row.get("total_input_tokens")?,
            total_output_tokens: row.get("total_output_tokens")?,
            tool_count: row.get("tool_count")?,
        })
    }

    // ============================================
    // Statistics
    // ============================================

    /// Number of indexed files
    pub fn file_count(&self) -> Result<i64> {
        let conn = self.read();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Number of stored messages
    pub fn message_count(&self) -> Result<i64> {
        let conn = self.read();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Time of the most recent file replacement
    pub fn last_indexed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.read();
        let ts: Option<String> =
            conn.query_row("SELECT MAX(indexed_at) FROM files", [], |r| r.get(0))?;
        Ok(ts
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Time since the most recent file replacement, `None` if nothing is indexed
    pub fn index_age(&self) -> Result<Option<chrono::Duration>> {
        Ok(self
            .last_indexed_at()?
            .map(|ts| Utc::now().signed_duration_since(ts)))
    }

    /// Counts and freshness in one read
    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.read();
        let (file_count, session_count, message_count, last_indexed_at): (i64, i64, i64, Option<String>) = conn.query_row(
            r#"
            SELECT (SELECT COUNT(*) FROM files),
                   (SELECT COUNT(*) FROM sessions),
                   (SELECT COUNT(*) FROM messages),
                   (SELECT MAX(indexed_at) FROM files)
            "#,
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
        Ok(IndexStats {
            file_count,
            session_count,
            message_count,
            last_indexed_at,
        })
    }
}

/// Session columns joined with the owning file's path
pub(crate) const SESSION_SELECT: &str = r#"
    SELECT s.session_id, f.path, s.project, s.first_prompt, s.git_branch, s.model,
           s.created_at, s.modified_at, s.message_count, s.total_input_tokens,
           s.total_output_tokens, s.tool_count
    FROM sessions s
    JOIN files f ON f.id = s.file_id
"#;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Delete one file's messages, session and file row.
fn delete_file_rows(conn: &Connection, file_id: i64) -> rusqlite::Result<()> {
    // Messages first so the full-text delete trigger fires per row.
    conn.execute("DELETE FROM messages WHERE file_id = ?", [file_id])?;
    conn.execute("DELETE FROM sessions WHERE file_id = ?", [file_id])?;
    conn.execute("DELETE FROM files WHERE id = ?", [file_id])?;
    Ok(())
}

/// Cap stored text without splitting a character.
fn clamp_text(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Per-session aggregate computed from the stored events of one file.
#[derive(Debug, Default, PartialEq, Eq)]
struct SessionAggregate {
    first_prompt: String,
    git_branch: String,
    model: String,
    created_at: String,
    modified_at: String,
    message_count: i64,
    total_input_tokens: i64,
    total_output_tokens: i64,
    tool_count: i64,
}

impl SessionAggregate {
    fn from_events(events: &[&Event]) -> Self {
        let mut agg = SessionAggregate::default();
        let mut models: HashMap<String, (usize, usize)> = HashMap::new();

        for (i, event) in events.iter().enumerate() {
            agg.message_count += 1;
            agg.total_input_tokens = agg.total_input_tokens.saturating_add(event.input_tokens);
            agg.total_output_tokens = agg.total_output_tokens.saturating_add(event.output_tokens);
            agg.tool_count += event.tool_calls.len() as i64;

            if let Some(model) = event.model.as_deref().filter(|m| !m.is_empty()) {
                let entry = models.entry(format_model(model)).or_insert((0, i));
                entry.0 += 1;
                entry.1 = i;
            }

            if let Some(ts) = event.timestamp.as_deref().filter(|t| !t.is_empty()) {
                if agg.created_at.is_empty() || ts < agg.created_at.as_str() {
                    agg.created_at = ts.to_string();
                }
                if ts > agg.modified_at.as_str() {
                    agg.modified_at = ts.to_string();
                }
            }

            if agg.first_prompt.is_empty()
                && event.kind == EventKind::User
                && !event.text.is_empty()
            {
                agg.first_prompt = truncate_prompt(&event.text);
            }

            if agg.git_branch.is_empty() {
                if let Some(branch) = event.git_branch.as_deref() {
                    agg.git_branch = branch.to_string();
                }
            }
        }

        // Most frequent model; ties go to the one seen last.
        agg.model = models
            .into_iter()
            .max_by_key(|(_, (count, last))| (*count, *last))
            .map(|(model, _)| model)
            .unwrap_or_default();

        agg
    }
}

fn truncate_prompt(text: &str) -> String {
    text.chars().take(MAX_PROMPT_CHARS).collect()
}
