//! # clog-core
//!
//! Core library for clog - a local indexer and search tool for Claude
//! conversation logs.
//!
//! This library provides:
//! - A tolerant parser for JSONL session records
//! - File discovery across project roots
//! - An SQLite store with a full-text index over message text
//! - An indexing pipeline (full and incremental) with a background worker
//! - Regex watch subscriptions matched against newly indexed messages
//! - A query language mixing free text with `field:value` filters
//! - Readers for project listings, hooks and memory notes kept beside the logs
//! - Configuration and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use clog_core::{Config, Database, QueryEngine, Scope};
//! use std::sync::Arc;
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Arc::new(Database::open(&Config::database_path()).expect("failed to open database"));
//! db.migrate().expect("failed to create schema");
//!
//! let engine = QueryEngine::new(db);
//! let results = engine
//!     .search("deploy type:user", &Scope::Global, config.search.limit)
//!     .expect("search failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use ingest::{IndexCoordinator, IndexEvent, IndexRequest, IndexSummary, IndexWorker};
pub use query::QueryEngine;
pub use types::*;
pub use watch::WatchEngine;

// Public modules
pub mod claude;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod types;
pub mod watch;
