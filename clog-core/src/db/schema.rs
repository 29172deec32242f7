//! Database schema
//!
//! Managed via PRAGMA user_version: version 0 creates everything, any other
//! version is taken as current.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: initial schema
    r#"
    -- ============================================
    -- Indexed files and their aggregates
    -- ============================================

    CREATE TABLE IF NOT EXISTS files (
        id          INTEGER PRIMARY KEY,
        path        TEXT    UNIQUE NOT NULL,
        project     TEXT    NOT NULL,
        session_id  TEXT    NOT NULL,
        mtime       INTEGER NOT NULL,     -- unix millis
        size        INTEGER NOT NULL,
        indexed_at  TEXT    NOT NULL      -- RFC 3339
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id                  INTEGER PRIMARY KEY,
        session_id          TEXT    UNIQUE NOT NULL,
        file_id             INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        project             TEXT    NOT NULL,
        first_prompt        TEXT    NOT NULL DEFAULT '',
        git_branch          TEXT    NOT NULL DEFAULT '',
        model               TEXT    NOT NULL DEFAULT '',
        created_at          TEXT    NOT NULL DEFAULT '',
        modified_at         TEXT    NOT NULL DEFAULT '',
        message_count       INTEGER NOT NULL DEFAULT 0,
        total_input_tokens  INTEGER NOT NULL DEFAULT 0,
        total_output_tokens INTEGER NOT NULL DEFAULT 0,
        tool_count          INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);
    CREATE INDEX IF NOT EXISTS idx_sessions_branch ON sessions(git_branch);
    CREATE INDEX IF NOT EXISTS idx_sessions_model ON sessions(model);
    CREATE INDEX IF NOT EXISTS idx_sessions_modified ON sessions(modified_at);

    -- ============================================
    -- Messages and full-text mirror
    -- ============================================

    CREATE TABLE IF NOT EXISTS messages (
        id            INTEGER PRIMARY KEY,
        file_id       INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        session_id    TEXT    NOT NULL,
        type          TEXT    NOT NULL,
        timestamp     TEXT    NOT NULL DEFAULT '',
        model         TEXT    NOT NULL DEFAULT '',
        text          TEXT    NOT NULL DEFAULT '',
        tool_calls    TEXT    NOT NULL DEFAULT '',
        input_tokens  INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_messages_file ON messages(file_id);
    CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
    CREATE INDEX IF NOT EXISTS idx_messages_type ON messages(type);

    CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
        text, tool_calls,
        content=messages, content_rowid=id,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
        INSERT INTO messages_fts(rowid, text, tool_calls)
        VALUES (new.id, new.text, new.tool_calls);
    END;

    CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
        INSERT INTO messages_fts(messages_fts, rowid, text, tool_calls)
        VALUES ('delete', old.id, old.text, old.tool_calls);
    END;

    -- ============================================
    -- Watchlist
    -- ============================================

    CREATE TABLE IF NOT EXISTS watchlist (
        id         INTEGER PRIMARY KEY,
        name       TEXT    NOT NULL,
        pattern    TEXT    NOT NULL,
        enabled    INTEGER NOT NULL DEFAULT 1,
        color      TEXT    NOT NULL DEFAULT '#b56a6a',
        created_at TEXT    NOT NULL
    );

    CREATE TABLE IF NOT EXISTS watchlist_matches (
        id           INTEGER PRIMARY KEY,
        watchlist_id INTEGER NOT NULL REFERENCES watchlist(id) ON DELETE CASCADE,
        message_id   INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        session_id   TEXT    NOT NULL,
        matched_text TEXT    NOT NULL DEFAULT '',
        seen         INTEGER NOT NULL DEFAULT 0,
        UNIQUE(watchlist_id, message_id)
    );

    CREATE INDEX IF NOT EXISTS idx_wm_message ON watchlist_matches(message_id);
    CREATE INDEX IF NOT EXISTS idx_wm_session ON watchlist_matches(session_id);
    "#,
];

/// Create the schema if the database is new.
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version != 0 {
        tracing::debug!(current_version, "Schema already present");
        return Ok(());
    }

    tracing::info!(target_version = SCHEMA_VERSION, "Creating database schema");

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        tracing::info!(version, "Running migration");
        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
