//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/clog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/clog/` (~/.config/clog/)
//! - Data: `$XDG_DATA_HOME/clog/` (~/.local/share/clog/)
//! - State/Logs: `$XDG_STATE_HOME/clog/` (~/.local/state/clog/)

use crate::error::{Error, Result};
use crate::types::ScopeKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Expand a leading `~` and resolve the path if it exists.
///
/// Paths that do not exist yet are only normalized lexically, so `a/b/` and
/// `a/./b` still compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    };
    std::fs::canonicalize(&expanded).unwrap_or_else(|_| expanded.components().collect())
}

/// Rolling log files are named `<prefix>.<date>.<suffix>`.
pub const LOG_FILE_PREFIX: &str = "clog";
pub const LOG_FILE_SUFFIX: &str = "log";

/// Main configuration struct
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where to look for conversation logs
    #[serde(default)]
    pub index: IndexConfig,

    /// Search defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Watchlist and file-watch settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log root configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Override for the assistant's data directory (default `~/.claude`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_dir: Option<PathBuf>,

    /// Extra project roots scanned after the default one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_paths: Vec<PathBuf>,
}

/// Search configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Scope used when none is given on the command line
    #[serde(default)]
    pub default_scope: ScopeKind,

    /// Maximum number of results
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_scope: ScopeKind::default(),
            limit: default_search_limit(),
        }
    }
}

fn default_search_limit() -> usize {
    50
}

/// Watchlist configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Quiet period before a burst of file changes triggers a re-index
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Display color for new subscriptions
    #[serde(default = "default_watch_color")]
    pub default_color: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            default_color: default_watch_color(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

/// Default display color for watch subscriptions
pub fn default_watch_color() -> String {
    "#b56a6a".to_string()
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Write configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Write configuration to a specific path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Add an extra project root. Returns `false` if it was already present.
    pub fn add_project_path(&mut self, path: &Path) -> bool {
        let clean = normalize_path(path);
        if self
            .index
            .project_paths
            .iter()
            .any(|p| normalize_path(p) == clean)
        {
            return false;
        }
        self.index.project_paths.push(clean);
        true
    }

    /// Remove an extra project root. Returns `false` if it was not configured.
    pub fn remove_project_path(&mut self, path: &Path) -> bool {
        let clean = normalize_path(path);
        let before = self.index.project_paths.len();
        self.index
            .project_paths
            .retain(|p| normalize_path(p) != clean);
        self.index.project_paths.len() != before
    }

    /// The assistant's data directory.
    ///
    /// Resolution order: `[index] claude_dir`, `$CLAUDE_CONFIG_DIR`, `~/.claude`.
    pub fn claude_dir(&self) -> PathBuf {
        if let Some(dir) = &self.index.claude_dir {
            return dir.clone();
        }
        std::env::var_os("CLAUDE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join(".claude"))
    }

    /// Default projects root plus configured extras, deduplicated, in order.
    pub fn project_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![normalize_path(&self.claude_dir().join("projects"))];
        for extra in &self.index.project_paths {
            let clean = normalize_path(extra);
            if !roots.contains(&clean) {
                roots.push(clean);
            }
        }
        roots
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/clog/config.toml` (~/.config/clog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("clog").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/clog/` (~/.local/share/clog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("clog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/clog/` (~/.local/state/clog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("clog")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/clog/index.db` (~/.local/share/clog/index.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("index.db")
    }

    /// Returns today's log file path
    ///
    /// Logs rotate daily (UTC) into the state directory as
    /// `clog.YYYY-MM-DD.log`.
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            chrono::Utc::now().format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
