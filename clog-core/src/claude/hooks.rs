//! Hook commands configured in the assistant's settings files
//!
//! Hooks live under the `hooks` key of three settings files, read in this
//! order:
//!
//! ```text
//! <claude_dir>/settings.json                   global
//! <project>/.claude/settings.json              project
//! <project>/.claude/settings.local.json        project-local
//! ```
//!
//! Each maps an event name (`PreToolUse`, `Stop`, ...) to groups of hooks
//! sharing an optional tool matcher.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which settings file a set of hooks came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingsScope {
    Global,
    Project,
    ProjectLocal,
}

impl SettingsScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsScope::Global => "global",
            SettingsScope::Project => "project",
            SettingsScope::ProjectLocal => "project-local",
        }
    }
}

impl std::fmt::Display for SettingsScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single hook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookEntry {
    /// `command` or `prompt`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Copied from the enclosing group
    #[serde(skip_deserializing)]
    pub matcher: String,
}

/// Hooks sharing a matcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookGroup {
    pub matcher: String,
    pub hooks: Vec<HookEntry>,
}

/// Every group registered for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookEvent {
    pub event: String,
    pub groups: Vec<HookGroup>,
}

/// Hooks read from one settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HooksSource {
    pub scope: SettingsScope,
    pub path: PathBuf,
    /// Ordered by event name
    pub events: Vec<HookEvent>,
}

#[derive(Deserialize)]
struct SettingsFile {
    #[serde(default)]
    hooks: BTreeMap<String, Vec<HookGroup>>,
}

/// Hooks from one settings file. `Ok(None)` when it configures none.
pub fn load_hooks_from_file(path: &Path, scope: SettingsScope) -> Result<Option<HooksSource>> {
    let content = std::fs::read_to_string(path)?;
    let settings: SettingsFile = serde_json::from_str(&content)?;
    if settings.hooks.is_empty() {
        return Ok(None);
    }

    let events = settings
        .hooks
        .into_iter()
        .map(|(event, mut groups)| {
            for group in &mut groups {
                for hook in &mut group.hooks {
                    hook.matcher = group.matcher.clone();
                }
            }
            HookEvent { event, groups }
        })
        .collect();

    Ok(Some(HooksSource {
        scope,
        path: path.to_path_buf(),
        events,
    }))
}

/// Global hooks, then the project's shared and local ones when a project
/// directory is given. Files that are missing, unreadable, or without
/// hooks are skipped.
pub fn load_all_hooks(claude_dir: &Path, project_path: Option<&Path>) -> Vec<HooksSource> {
    let mut candidates = vec![(claude_dir.join("settings.json"), SettingsScope::Global)];
    if let Some(project) = project_path {
        let dir = project.join(".claude");
        candidates.push((dir.join("settings.json"), SettingsScope::Project));
        candidates.push((dir.join("settings.local.json"), SettingsScope::ProjectLocal));
    }

    candidates
        .into_iter()
        .filter_map(|(path, scope)| match load_hooks_from_file(&path, scope) {
            Ok(source) => source,
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable settings");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    const GLOBAL: &str = r#"{
        "model": "opus",
        "hooks": {
            "Stop": [{"hooks": [{"type": "command", "command": "notify-send done"}]}],
            "PreToolUse": [
                {"matcher": "Bash", "hooks": [
                    {"type": "command", "command": "guard.sh", "timeout": 30},
                    {"type": "prompt", "prompt": "Is this safe?"}
                ]}
            ]
        }
    }"#;

    #[test]
    fn test_load_hooks_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        write(&path, GLOBAL);

        let source = load_hooks_from_file(&path, SettingsScope::Global)
            .unwrap()
            .unwrap();
        assert_eq!(source.scope, SettingsScope::Global);
        assert_eq!(source.path, path);

        let events: Vec<&str> = source.events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(events, vec!["PreToolUse", "Stop"]);

        let pre = &source.events[0].groups[0];
        assert_eq!(pre.matcher, "Bash");
        assert_eq!(pre.hooks[0].command, "guard.sh");
        assert_eq!(pre.hooks[0].timeout, Some(30));
        assert_eq!(pre.hooks[0].matcher, "Bash");
        assert_eq!(pre.hooks[1].kind, "prompt");
        assert_eq!(pre.hooks[1].prompt, "Is this safe?");

        let stop = &source.events[1].groups[0];
        assert_eq!(stop.matcher, "");
        assert_eq!(stop.hooks[0].matcher, "");
    }

    #[test]
    fn test_settings_without_hooks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        write(&path, r#"{"model": "opus"}"#);
        assert!(load_hooks_from_file(&path, SettingsScope::Global)
            .unwrap()
            .is_none());

        write(&path, r#"{"hooks": {}}"#);
        assert!(load_hooks_from_file(&path, SettingsScope::Global)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_all_hooks_order_and_skips() {
        let claude = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        write(&claude.path().join("settings.json"), GLOBAL);
        write(
            &project.path().join(".claude/settings.json"),
            r#"{"hooks": {"PostToolUse": [{"matcher": "Edit", "hooks": [{"type": "command", "command": "fmt"}]}]}}"#,
        );
        write(&project.path().join(".claude/settings.local.json"), "{ broken");

        let sources = load_all_hooks(claude.path(), Some(project.path()));
        let scopes: Vec<SettingsScope> = sources.iter().map(|s| s.scope).collect();
        assert_eq!(scopes, vec![SettingsScope::Global, SettingsScope::Project]);
        assert_eq!(sources[1].events[0].groups[0].hooks[0].matcher, "Edit");

        let global_only = load_all_hooks(claude.path(), None);
        assert_eq!(global_only.len(), 1);

        let empty = TempDir::new().unwrap();
        assert!(load_all_hooks(empty.path(), Some(empty.path())).is_empty());
    }

    #[test]
    fn test_scope_labels() {
        assert_eq!(SettingsScope::ProjectLocal.to_string(), "project-local");
        assert_eq!(
            serde_json::to_string(&SettingsScope::ProjectLocal).unwrap(),
            "\"project-local\""
        );
    }
}
