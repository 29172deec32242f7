//! Query execution against the index.

use super::filter::{parse_query, FilterField, FilterSet, SqlFilter};
use crate::claude::sidechain_sessions;
use crate::db::repo::Database;
use crate::error::Result;
use crate::format::truncate_chars;
use crate::types::{Scope, SearchResult, SessionSummary};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Highlighted text is cut to this many characters for display.
pub const MAX_HIGHLIGHT_CHARS: usize = 300;

/// Session searches return at most this many sessions.
pub const MAX_SESSION_RESULTS: usize = 100;

/// Read-only query front end over the index.
///
/// Session listings leave out sessions that a project's
/// `sessions-index.json` under one of `roots` marks as sidechains.
#[derive(Clone)]
pub struct QueryEngine {
    db: Arc<Database>,
    roots: Vec<PathBuf>,
}

impl QueryEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_roots(db, Vec::new())
    }

    pub fn with_roots(db: Arc<Database>, roots: Vec<PathBuf>) -> Self {
        Self { db, roots }
    }

    /// Sessions of `project`, most recently modified first, sidechains
    /// excluded.
    pub fn project_sessions(&self, project: &str) -> Result<Vec<SessionSummary>> {
        let hidden = sidechain_sessions(&self.roots);
        let mut sessions = self.db.sessions_by_project(project)?;
        sessions.retain(|s| !hidden.contains(&s.session_id));
        Ok(sessions)
    }

    /// Messages matching `query` within `scope`.
    ///
    /// Full-text queries are ordered by relevance; filter-only queries by
    /// session modification time, then message time, newest first. An empty
    /// query returns nothing.
    pub fn search(&self, query: &str, scope: &Scope, limit: usize) -> Result<Vec<SearchResult>> {
        let set = parse_query(query);
        if set.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = set.to_sql();
        apply_scope(&set, scope, &mut sql);

        let statement = if set.has_fts() {
            format!(
                r#"
                SELECT m.id, m.session_id, s.project, f.path, m.type, m.timestamp, s.model,
                       m.text, highlight(messages_fts, 0, '<<', '>>') AS highlighted,
                       m.tool_calls, m.input_tokens, m.output_tokens
                FROM messages m
                JOIN messages_fts ON messages_fts.rowid = m.id
                JOIN sessions s ON s.file_id = m.file_id
                JOIN files f ON f.id = m.file_id
                WHERE {}
                ORDER BY rank
                LIMIT ?
                "#,
                sql.where_clause()
            )
        } else {
            format!(
                r#"
                SELECT m.id, m.session_id, s.project, f.path, m.type, m.timestamp, s.model,
                       m.text, m.text AS highlighted,
                       m.tool_calls, m.input_tokens, m.output_tokens
                FROM messages m
                JOIN sessions s ON s.file_id = m.file_id
                JOIN files f ON f.id = m.file_id
                WHERE {}
                ORDER BY s.modified_at DESC, m.timestamp DESC
                LIMIT ?
                "#,
                sql.where_clause()
            )
        };

        let mut params = sql.params;
        params.push(Value::Integer(limit as i64));

        let conn = self.db.read();
        let mut stmt = conn.prepare(&statement)?;
        let results = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let path: String = row.get("path")?;
                let highlighted: String = row.get("highlighted")?;
                Ok(SearchResult {
                    message_id: row.get("id")?,
                    session_id: row.get("session_id")?,
                    project: row.get("project")?,
                    path: PathBuf::from(path),
                    kind: row.get("type")?,
                    timestamp: row.get("timestamp")?,
                    model: row.get("model")?,
                    text: row.get("text")?,
                    highlighted: truncate_chars(&highlighted, MAX_HIGHLIGHT_CHARS),
                    tool_calls: row.get("tool_calls")?,
                    input_tokens: row.get("input_tokens")?,
                    output_tokens: row.get("output_tokens")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(query, scope = ?scope.kind(), count = results.len(), "Search");
        Ok(results)
    }

    /// Distinct sessions with at least one message matching `query`, most
    /// recently modified first, capped at [`MAX_SESSION_RESULTS`]. Sidechain
    /// sessions are left out.
    pub fn search_sessions(&self, query: &str, scope: &Scope) -> Result<Vec<SessionSummary>> {
        let set = parse_query(query);
        if set.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = set.to_sql();
        apply_scope(&set, scope, &mut sql);

        let mut hidden: Vec<String> = sidechain_sessions(&self.roots).into_iter().collect();
        if !hidden.is_empty() {
            hidden.sort();
            sql.conditions.push(format!(
                "s.session_id NOT IN ({})",
                vec!["?"; hidden.len()].join(", ")
            ));
            sql.params.extend(hidden.into_iter().map(Value::Text));
        }

        let fts_join = if set.has_fts() {
            "JOIN messages_fts ON messages_fts.rowid = m.id"
        } else {
            ""
        };
        let statement = format!(
            r#"
            SELECT DISTINCT s.session_id, f.path, s.project, s.first_prompt, s.git_branch, s.model,
                   s.created_at, s.modified_at, s.message_count, s.total_input_tokens,
                   s.total_output_tokens, s.tool_count
            FROM messages m
            {}
            JOIN sessions s ON s.file_id = m.file_id
            JOIN files f ON f.id = s.file_id
            WHERE {}
            ORDER BY s.modified_at DESC
            LIMIT {}
            "#,
            fts_join,
            sql.where_clause(),
            MAX_SESSION_RESULTS
        );

        let conn = self.db.read();
        let mut stmt = conn.prepare(&statement)?;
        let sessions = stmt
            .query_map(params_from_iter(sql.params.iter()), Database::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Number of full-text matches for `query` within `scope`. Zero for
    /// filter-only queries.
    pub fn match_count(&self, query: &str, scope: &Scope) -> Result<i64> {
        let set = parse_query(query);
        if !set.has_fts() {
            return Ok(0);
        }

        let mut sql = set.to_sql();
        apply_scope(&set, scope, &mut sql);

        let statement = format!(
            r#"
            SELECT COUNT(*)
            FROM messages m
            JOIN messages_fts ON messages_fts.rowid = m.id
            JOIN sessions s ON s.file_id = m.file_id
            WHERE {}
            "#,
            sql.where_clause()
        );

        let conn = self.db.read();
        let count: i64 =
            conn.query_row(&statement, params_from_iter(sql.params.iter()), |r| r.get(0))?;
        Ok(count)
    }
}

/// Narrow a query to its scope. A project scope is skipped when the query
/// names a project itself.
fn apply_scope(set: &FilterSet, scope: &Scope, sql: &mut SqlFilter) {
    match scope {
        Scope::Local(session_id) => {
            sql.push("m.session_id = ?", Value::Text(session_id.clone()));
        }
        Scope::Project(project) if !project.is_empty() && !set.has_filter(FilterField::Project) => {
            sql.push("s.project = ?", Value::Text(project.clone()));
        }
        Scope::Project(_) | Scope::Global => {}
    }
}
