//! Core domain types for clog
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One normalized record parsed from a raw log line |
//! | **Session** | Aggregate of all events in one log file, keyed by the file stem |
//! | **Project** | Directory of sessions, named after the working directory it records |
//! | **Subscription** | A persisted regex evaluated against message text |
//! | **Match** | A subscription firing on one message, with seen/unseen state |

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================
// Events
// ============================================

/// Type of a parsed log record.
///
/// `Other` carries the raw type of internal marker records (progress,
/// queue operations, history snapshots). They are recognized by the parser
/// and dropped by the store before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    User,
    Assistant,
    ToolResult,
    System,
    Other(String),
}

impl EventKind {
    /// Stored type string (`user`, `assistant`, `tool-result`, `system`)
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::User => "user",
            EventKind::Assistant => "assistant",
            EventKind::ToolResult => "tool-result",
            EventKind::System => "system",
            EventKind::Other(raw) => raw,
        }
    }

    /// Whether events of this kind are written to the index.
    pub fn is_stored(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One normalized record derived from a raw log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub uuid: String,
    /// ISO-8601 timestamp as written in the log
    pub timestamp: Option<String>,
    /// Raw model id (assistant events only)
    pub model: Option<String>,
    pub text: String,
    /// Tool names in invocation order (assistant events only)
    pub tool_calls: Vec<String>,
    /// Base input + cache read + cache creation tokens
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
}

impl Event {
    /// Empty event of the given kind
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            uuid: String::new(),
            timestamp: None,
            model: None,
            text: String::new(),
            tool_calls: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            git_branch: None,
            cwd: None,
        }
    }

    pub fn total_tokens(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

// ============================================
// Files
// ============================================

/// A log file found on disk, identified by metadata only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub project: String,
    /// File name without the `.jsonl` extension
    pub session_id: String,
    /// Modification time in unix milliseconds
    pub modified_ms: i64,
    pub size: i64,
}

/// Stored metadata for an indexed file, compared against discovery
/// results to decide whether a file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    pub modified_ms: i64,
    pub size: i64,
}

impl DiscoveredFile {
    pub fn state(&self) -> FileState {
        FileState {
            modified_ms: self.modified_ms,
            size: self.size,
        }
    }
}

// ============================================
// Sessions
// ============================================

/// Session row joined with its file path, as shown in session lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub path: PathBuf,
    pub project: String,
    pub first_prompt: String,
    pub git_branch: String,
    /// Normalized family name (`opus`, `sonnet`, ...)
    pub model: String,
    pub created_at: String,
    pub modified_at: String,
    pub message_count: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub tool_count: i64,
}

// ============================================
// Search
// ============================================

/// How far a query reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// One session
    Local,
    /// One project
    #[default]
    Project,
    /// Everything indexed
    Global,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Local => "local",
            ScopeKind::Project => "project",
            ScopeKind::Global => "global",
        }
    }
}

impl std::str::FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ScopeKind::Local),
            "project" => Ok(ScopeKind::Project),
            "global" => Ok(ScopeKind::Global),
            _ => Err(format!("unknown scope: {}", s)),
        }
    }
}

/// Scope bound to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Local(String),
    Project(String),
    Global,
}

impl Scope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Local(_) => ScopeKind::Local,
            Scope::Project(_) => ScopeKind::Project,
            Scope::Global => ScopeKind::Global,
        }
    }
}

/// One message returned by a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub message_id: i64,
    pub session_id: String,
    pub project: String,
    pub path: PathBuf,
    pub kind: String,
    pub timestamp: String,
    pub model: String,
    /// Stored message text, untruncated
    pub text: String,
    /// Display excerpt; full-text hits wrap terms in `<<` and `>>`
    pub highlighted: String,
    pub tool_calls: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

// ============================================
// Watchlist
// ============================================

/// A persisted regex subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub name: String,
    pub pattern: String,
    pub enabled: bool,
    pub color: String,
    pub created_at: String,
    /// Matches not yet marked seen
    pub unseen_count: i64,
}

/// A subscription firing on one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchMatch {
    pub id: i64,
    pub subscription_id: i64,
    pub message_id: i64,
    pub session_id: String,
    pub project: String,
    pub timestamp: String,
    /// Bounded context around the first occurrence
    pub snippet: String,
    pub seen: bool,
}

// ============================================
// Index statistics
// ============================================

/// Size and freshness of the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: i64,
    pub session_count: i64,
    pub message_count: i64,
    /// RFC 3339 time of the most recent file replacement
    pub last_indexed_at: Option<String>,
}
