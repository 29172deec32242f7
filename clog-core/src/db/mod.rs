//! Database layer for clog
//!
//! This module provides the storage layer using SQLite with:
//! - Schema creation keyed on PRAGMA user_version
//! - An FTS5 mirror of message text kept in sync by triggers
//! - Transactional file-level replacement for re-indexing

pub mod repo;
pub mod schema;

pub use repo::{Database, ReadHandle, WriteHandle, MAX_MESSAGE_CHARS, MAX_PROMPT_CHARS};
