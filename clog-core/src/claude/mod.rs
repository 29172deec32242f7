//! Readers for the assistant's own files around the session logs
//!
//! - [`projects`]: project directories under each root and their
//!   `sessions-index.json` listings, including sidechain flags
//! - [`hooks`]: hook commands configured in global and per-project settings
//! - [`memory`]: a project's `memory/*.md` notes
//!
//! These read the filesystem directly and never touch the index.

pub mod hooks;
pub mod memory;
pub mod projects;

pub use hooks::{
    load_all_hooks, load_hooks_from_file, HookEntry, HookEvent, HookGroup, HooksSource,
    SettingsScope,
};
pub use memory::{load_memory, MemoryFile};
pub use projects::{
    discover_projects, find_project, load_sessions, load_sessions_index, sidechain_sessions,
    Project, SessionEntry, SessionsIndex,
};
