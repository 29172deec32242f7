//! Watchlist: regex subscriptions evaluated against stored messages.
//!
//! A subscription is backfilled against every stored message when it is
//! created or its pattern changes. After that, only messages inserted by an
//! index pass are evaluated ([`WatchEngine::match_new`]). Each message
//! records at most one match per subscription, at the leftmost occurrence.

mod cache;

pub use cache::RegexCache;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Subscription, WatchMatch};
use chrono::Utc;
use regex::Regex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::Arc;

/// Display color used when none is given
pub const DEFAULT_COLOR: &str = "#b56a6a";

/// Characters of context kept around a match, split evenly before and after.
pub const SNIPPET_CONTEXT: usize = 100;

/// Upper bound on ids per `IN (...)` list.
const ID_CHUNK: usize = 500;

const SUBSCRIPTION_SELECT: &str = r#"
    SELECT w.id, w.name, w.pattern, w.enabled, w.color, w.created_at,
           (SELECT COUNT(*) FROM watchlist_matches wm
            WHERE wm.watchlist_id = w.id AND wm.seen = 0) AS unseen
    FROM watchlist w
"#;

const INSERT_MATCH: &str = r#"
    INSERT OR IGNORE INTO watchlist_matches (watchlist_id, message_id, session_id, matched_text, seen)
    VALUES (?1, ?2, ?3, ?4, 0)
"#;

/// Evaluates subscriptions and tracks seen/unseen state.
#[derive(Clone)]
pub struct WatchEngine {
    db: Arc<Database>,
    cache: Arc<RegexCache>,
}

impl WatchEngine {
    /// Engine using the process-wide regex cache
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_cache(db, RegexCache::shared())
    }

    pub fn with_cache(db: Arc<Database>, cache: Arc<RegexCache>) -> Self {
        Self { db, cache }
    }

    // ============================================
    // Subscription lifecycle
    // ============================================

    /// Validate, persist, and backfill a new subscription.
    ///
    /// Nothing is written if the pattern does not compile. An empty `color`
    /// falls back to [`DEFAULT_COLOR`].
    pub fn add_subscription(&self, name: &str, pattern: &str, color: &str) -> Result<Subscription> {
        let re = self.cache.get_or_compile(pattern)?;
        let color = if color.is_empty() { DEFAULT_COLOR } else { color };
        let created_at = Utc::now().to_rfc3339();

        let mut conn = self.db.write();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO watchlist (name, pattern, enabled, color, created_at) VALUES (?1, ?2, 1, ?3, ?4)",
            params![name, pattern, color, created_at],
        )?;
        let id = tx.last_insert_rowid();
        let matched = backfill(&tx, id, &re)?;
        tx.commit()?;

        tracing::info!(id, name, pattern, matched, "Added watch subscription");

        Ok(Subscription {
            id,
            name: name.to_string(),
            pattern: pattern.to_string(),
            enabled: true,
            color: color.to_string(),
            created_at,
            unseen_count: matched as i64,
        })
    }

    /// Change a subscription's name and pattern, discarding and recomputing
    /// all of its matches.
    ///
    /// The pattern is validated before anything is touched. Disabled
    /// subscriptions are left without matches until re-enabled and new
    /// messages arrive.
    pub fn update_pattern(&self, id: i64, name: &str, pattern: &str) -> Result<()> {
        let re = self.cache.get_or_compile(pattern)?;

        let mut conn = self.db.write();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE watchlist SET name = ?1, pattern = ?2 WHERE id = ?3",
            params![name, pattern, id],
        )?;
        if updated == 0 {
            return Err(Error::SubscriptionNotFound(id));
        }
        tx.execute("DELETE FROM watchlist_matches WHERE watchlist_id = ?", [id])?;

        let enabled: bool =
            tx.query_row("SELECT enabled FROM watchlist WHERE id = ?", [id], |r| r.get(0))?;
        let matched = if enabled { backfill(&tx, id, &re)? } else { 0 };
        tx.commit()?;

        tracing::info!(id, pattern, matched, "Updated watch subscription");
        Ok(())
    }

    /// Delete a subscription and its matches
    pub fn remove_subscription(&self, id: i64) -> Result<()> {
        let conn = self.db.write();
        let removed = conn.execute("DELETE FROM watchlist WHERE id = ?", [id])?;
        if removed == 0 {
            return Err(Error::SubscriptionNotFound(id));
        }
        tracing::info!(id, "Removed watch subscription");
        Ok(())
    }

    /// Flip the enabled flag. Returns the new state.
    pub fn toggle_subscription(&self, id: i64) -> Result<bool> {
        let conn = self.db.write();
        let updated = conn.execute("UPDATE watchlist SET enabled = NOT enabled WHERE id = ?", [id])?;
        if updated == 0 {
            return Err(Error::SubscriptionNotFound(id));
        }
        let enabled: bool =
            conn.query_row("SELECT enabled FROM watchlist WHERE id = ?", [id], |r| r.get(0))?;
        Ok(enabled)
    }

    // ============================================
    // Incremental matching
    // ============================================

    /// Evaluate every enabled subscription against exactly `message_ids`.
    /// Returns the number of matches created.
    pub fn match_new(&self, message_ids: &[i64]) -> Result<usize> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.write();
        let active = self.enabled_patterns(&conn)?;
        if active.is_empty() {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let mut created = 0;
        {
            let mut insert = tx.prepare(INSERT_MATCH)?;
            for chunk in message_ids.chunks(ID_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut select = tx.prepare(&format!(
                    "SELECT id, session_id, text FROM messages WHERE id IN ({})",
                    placeholders
                ))?;
                let messages = select
                    .query_map(params_from_iter(chunk.iter()), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                for (sub_id, re) in &active {
                    for (message_id, session_id, text) in &messages {
                        if let Some(m) = re.find(text) {
                            let snippet = extract_snippet(text, m.start(), m.end(), SNIPPET_CONTEXT);
                            created += insert.execute(params![sub_id, message_id, session_id, snippet])?;
                        }
                    }
                }
            }
        }
        tx.commit()?;

        if created > 0 {
            tracing::info!(created, messages = message_ids.len(), "New watch matches");
        }
        Ok(created)
    }

    fn enabled_patterns(&self, conn: &Connection) -> Result<Vec<(i64, Arc<Regex>)>> {
        let mut stmt = conn.prepare("SELECT id, pattern FROM watchlist WHERE enabled = 1")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut active = Vec::with_capacity(rows.len());
        for (id, pattern) in rows {
            match self.cache.get_or_compile(&pattern) {
                Ok(re) => active.push((id, re)),
                Err(e) => tracing::warn!(id, error = %e, "Skipping subscription with bad pattern"),
            }
        }
        Ok(active)
    }

    // ============================================
    // Reads
    // ============================================

    /// All subscriptions, oldest first, with unseen counts
    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let conn = self.db.read();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY w.created_at ASC, w.id ASC",
            SUBSCRIPTION_SELECT
        ))?;
        let subs = stmt
            .query_map([], row_to_subscription)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    pub fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let conn = self.db.read();
        conn.query_row(
            &format!("{} WHERE w.id = ?", SUBSCRIPTION_SELECT),
            [id],
            row_to_subscription,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Matches for one subscription, newest message first
    pub fn matches_for(&self, id: i64, limit: usize) -> Result<Vec<WatchMatch>> {
        let conn = self.db.read();
        let mut stmt = conn.prepare(
            r#"
            SELECT wm.id, wm.watchlist_id, wm.message_id, wm.session_id, wm.matched_text, wm.seen,
                   COALESCE(m.timestamp, '') AS timestamp,
                   COALESCE(s.project, '') AS project
            FROM watchlist_matches wm
            LEFT JOIN messages m ON m.id = wm.message_id
            LEFT JOIN sessions s ON s.session_id = wm.session_id
            WHERE wm.watchlist_id = ?1
            ORDER BY m.timestamp DESC, wm.id DESC
            LIMIT ?2
            "#,
        )?;
        let matches = stmt
            .query_map(params![id, limit as i64], |row| {
                Ok(WatchMatch {
                    id: row.get("id")?,
                    subscription_id: row.get("watchlist_id")?,
                    message_id: row.get("message_id")?,
                    session_id: row.get("session_id")?,
                    snippet: row.get("matched_text")?,
                    seen: row.get("seen")?,
                    timestamp: row.get("timestamp")?,
                    project: row.get("project")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    /// Unseen matches across all subscriptions
    pub fn total_unseen(&self) -> Result<i64> {
        let conn = self.db.read();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM watchlist_matches WHERE seen = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    // ============================================
    // Seen bookkeeping
    // ============================================

    /// Mark every match of one subscription seen. Returns rows changed.
    pub fn mark_subscription_seen(&self, id: i64) -> Result<usize> {
        let conn = self.db.write();
        let changed = conn.execute(
            "UPDATE watchlist_matches SET seen = 1 WHERE watchlist_id = ? AND seen = 0",
            [id],
        )?;
        Ok(changed)
    }

    /// Mark every match in one session seen, across subscriptions.
    pub fn mark_session_seen(&self, session_id: &str) -> Result<usize> {
        let conn = self.db.write();
        let changed = conn.execute(
            "UPDATE watchlist_matches SET seen = 1 WHERE session_id = ? AND seen = 0",
            [session_id],
        )?;
        Ok(changed)
    }
}

fn row_to_subscription(row: &Row) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get("id")?,
        name: row.get("name")?,
        pattern: row.get("pattern")?,
        enabled: row.get("enabled")?,
        color: row.get("color")?,
        created_at: row.get("created_at")?,
        unseen_count: row.get("unseen")?,
    })
}

/// Evaluate one subscription against every stored message.
fn backfill(conn: &Connection, subscription_id: i64, re: &Regex) -> Result<usize> {
    let hits = {
        let mut select = conn.prepare("SELECT id, session_id, text FROM messages")?;
        let mut rows = select.query([])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(2)?;
            if let Some(m) = re.find(&text) {
                let snippet = extract_snippet(&text, m.start(), m.end(), SNIPPET_CONTEXT);
                hits.push((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, snippet));
            }
        }
        hits
    };

    let mut insert = conn.prepare(INSERT_MATCH)?;
    let mut created = 0;
    for (message_id, session_id, snippet) in hits {
        created += insert.execute(params![subscription_id, message_id, session_id, snippet])?;
    }
    Ok(created)
}

/// Context around a match: `context / 2` characters on each side, newlines
/// flattened to spaces, `...` marking either cut side.
///
/// `start` and `end` are byte offsets of the match in `text`.
pub fn extract_snippet(text: &str, start: usize, end: usize, context: usize) -> String {
    let half = context / 2;

    let from = if half == 0 {
        start
    } else {
        text[..start]
            .char_indices()
            .rev()
            .nth(half - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let to = text[end..]
        .char_indices()
        .nth(half)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    let mut snippet = text[from..to].replace('\n', " ");
    if from > 0 {
        snippet.insert_str(0, "...");
    }
    if to < text.len() {
        snippet.push_str("...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiscoveredFile, Event, EventKind};
    use std::path::PathBuf;

    fn create_test_engine() -> (Arc<Database>, WatchEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let engine = WatchEngine::with_cache(Arc::clone(&db), Arc::new(RegexCache::new()));
        (db, engine)
    }

    fn seed(db: &Database, session_id: &str, texts: &[&str]) -> Vec<i64> {
        let file = DiscoveredFile {
            path: PathBuf::from(format!("/logs/app/{}.jsonl", session_id)),
            project: "app".to_string(),
            session_id: session_id.to_string(),
            modified_ms: 1,
            size: 1,
        };
        let events: Vec<Event> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut e = Event::new(EventKind::User);
                e.text = t.to_string();
                e.timestamp = Some(format!("2025-01-01T00:00:0{}Z", i));
                e
            })
            .collect();
        db.replace_file(&file, &events).unwrap()
    }

    fn watch_rows(db: &Database) -> i64 {
        db.read()
            .query_row("SELECT COUNT(*) FROM watchlist", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_add_backfills_and_seen_clears() {
        let (db, engine) = create_test_engine();
        seed(&db, "s1", &["fix the deploy bug", "unrelated", "deploy again"]);

        let sub = engine.add_subscription("deploys", "deploy", "").unwrap();
        assert_eq!(sub.color, DEFAULT_COLOR);
        assert_eq!(sub.unseen_count, 2);
        assert_eq!(engine.total_unseen().unwrap(), 2);

        assert_eq!(engine.mark_subscription_seen(sub.id).unwrap(), 2);
        let listed = engine.get_subscription(sub.id).unwrap().unwrap();
        assert_eq!(listed.unseen_count, 0);
        assert_eq!(engine.total_unseen().unwrap(), 0);
    }

    #[test]
    fn test_invalid_pattern_rejected_everywhere() {
        let (db, engine) = create_test_engine();
        let before = watch_rows(&db);
        assert!(matches!(
            engine.add_subscription("bad", "[unclosed", ""),
            Err(Error::InvalidPattern { .. })
        ));
        assert_eq!(watch_rows(&db), before);

        let sub = engine.add_subscription("ok", "ok", "#fff").unwrap();
        let before = watch_rows(&db);
        assert!(matches!(
            engine.update_pattern(sub.id, "bad", "(open"),
            Err(Error::InvalidPattern { .. })
        ));
        assert_eq!(watch_rows(&db), before);
        let unchanged = engine.get_subscription(sub.id).unwrap().unwrap();
        assert_eq!(unchanged.name, "ok");
        assert_eq!(unchanged.pattern, "ok");
    }

    #[test]
    fn test_match_new_only_given_ids() {
        let (db, engine) = create_test_engine();
        let sub = engine.add_subscription("errors", r"error\s+\d+", "").unwrap();
        assert_eq!(sub.unseen_count, 0);

        let first = seed(&db, "s1", &["error 42 happened"]);
        let second = seed(&db, "s2", &["error 7 too", "fine"]);

        assert_eq!(engine.match_new(&second).unwrap(), 1);
        assert_eq!(engine.total_unseen().unwrap(), 1);
        assert_eq!(engine.match_new(&first).unwrap(), 1);
        // Re-evaluating the same ids does not duplicate.
        assert_eq!(engine.match_new(&first).unwrap(), 0);
        assert_eq!(engine.match_new(&[]).unwrap(), 0);
        assert_eq!(engine.total_unseen().unwrap(), 2);
    }

    #[test]
    fn test_disabled_subscriptions_are_skipped() {
        let (db, engine) = create_test_engine();
        let sub = engine.add_subscription("w", "needle", "").unwrap();
        assert!(!engine.toggle_subscription(sub.id).unwrap());

        let ids = seed(&db, "s1", &["a needle here"]);
        assert_eq!(engine.match_new(&ids).unwrap(), 0);

        assert!(engine.toggle_subscription(sub.id).unwrap());
        assert_eq!(engine.match_new(&ids).unwrap(), 1);
    }

    #[test]
    fn test_update_pattern_rebackfills() {
        let (db, engine) = create_test_engine();
        seed(&db, "s1", &["alpha", "beta", "beta again"]);
        let sub = engine.add_subscription("w", "alpha", "").unwrap();
        assert_eq!(sub.unseen_count, 1);
        engine.mark_subscription_seen(sub.id).unwrap();

        engine.update_pattern(sub.id, "betas", "beta").unwrap();
        let updated = engine.get_subscription(sub.id).unwrap().unwrap();
        assert_eq!(updated.name, "betas");
        assert_eq!(updated.unseen_count, 2);

        assert!(matches!(
            engine.update_pattern(999, "x", "x"),
            Err(Error::SubscriptionNotFound(999))
        ));
    }

    #[test]
    fn test_mark_session_seen_and_matches_for() {
        let (db, engine) = create_test_engine();
        seed(&db, "s1", &["todo one"]);
        seed(&db, "s2", &["todo two", "todo three"]);
        let a = engine.add_subscription("a", "todo", "").unwrap();
        let b = engine.add_subscription("b", "t(wo|hree)", "").unwrap();
        assert_eq!(engine.total_unseen().unwrap(), 5);

        assert_eq!(engine.mark_session_seen("s2").unwrap(), 4);
        assert_eq!(engine.total_unseen().unwrap(), 1);

        let matches = engine.matches_for(a.id, 10).unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].timestamp, "2025-01-01T00:00:01Z");
        assert_eq!(matches[0].project, "app");
        assert!(matches.iter().filter(|m| !m.seen).all(|m| m.session_id == "s1"));
        assert_eq!(engine.matches_for(b.id, 1).unwrap().len(), 1);

        let subs = engine.list_subscriptions().unwrap();
        assert_eq!(subs.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    }

    #[test]
    fn test_remove_cascades_matches() {
        let (db, engine) = create_test_engine();
        seed(&db, "s1", &["hit"]);
        let sub = engine.add_subscription("w", "hit", "").unwrap();
        engine.remove_subscription(sub.id).unwrap();
        assert_eq!(engine.total_unseen().unwrap(), 0);
        assert!(engine.get_subscription(sub.id).unwrap().is_none());
        assert!(matches!(
            engine.remove_subscription(sub.id),
            Err(Error::SubscriptionNotFound(_))
        ));
    }

    #[test]
    fn test_reindex_drops_matches_with_messages() {
        let (db, engine) = create_test_engine();
        seed(&db, "s1", &["hit"]);
        engine.add_subscription("w", "hit", "").unwrap();
        seed(&db, "s1", &["miss"]);
        assert_eq!(engine.total_unseen().unwrap(), 0);
    }

    #[test]
    fn test_snippet_first_match_with_context() {
        let text = format!("{}MATCH{}", "a".repeat(80), "b".repeat(80));
        let start = 80;
        let snippet = extract_snippet(&text, start, start + 5, 100);
        assert_eq!(
            snippet,
            format!("...{}MATCH{}...", "a".repeat(50), "b".repeat(50))
        );
    }

    #[test]
    fn test_snippet_short_text_and_newlines() {
        let text = "line one\ndeploy\nline three";
        let start = text.find("deploy").unwrap();
        let snippet = extract_snippet(text, start, start + 6, 100);
        assert_eq!(snippet, "line one deploy line three");
    }

    #[test]
    fn test_snippet_multibyte() {
        let text = format!("{}x{}", "é".repeat(60), "ü".repeat(60));
        let start = text.find('x').unwrap();
        let snippet = extract_snippet(&text, start, start + 1, 10);
        assert_eq!(snippet, format!("...{}x{}...", "é".repeat(5), "ü".repeat(5)));
    }
}
