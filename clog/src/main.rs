//! clog - index, search and watch Claude conversation logs
//!
//! Uses XDG Base Directory specification for file locations:
//! - Index: $XDG_DATA_HOME/clog/index.db (~/.local/share/clog/index.db)
//! - Logs: $XDG_STATE_HOME/clog/clog.YYYY-MM-DD.log (~/.local/state/clog/, rotated daily)
//! - Config: $XDG_CONFIG_HOME/clog/config.toml (~/.config/clog/config.toml)

mod live;
mod output;
mod watcher;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clog_core::claude::{self, Project};
use clog_core::ingest::{IndexCoordinator, IndexPhase, IndexProgress};
use clog_core::{Config, Database, QueryEngine, Scope, ScopeKind, WatchEngine};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "clog")]
#[command(about = "Index, search and watch Claude conversation logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Keep the index current and report watch matches as logs change (default)
    Live,

    /// Index project logs once
    Index {
        /// Re-index every file, not just changed ones
        #[arg(long)]
        full: bool,

        /// Drop the whole index first, then re-index everything
        #[arg(long, conflicts_with = "full")]
        reindex: bool,
    },

    /// Search indexed messages
    Search {
        /// Free text and field:value filters
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// local, project or global (default from config)
        #[arg(long)]
        scope: Option<ScopeKind>,

        /// Project for project scope (default: current directory name)
        #[arg(long)]
        project: Option<String>,

        /// Session for local scope
        #[arg(long)]
        session: Option<String>,

        /// Maximum results (default from config)
        #[arg(short, long)]
        limit: Option<usize>,

        /// List matching sessions instead of messages
        #[arg(long)]
        sessions: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Manage regex watch subscriptions
    Watch {
        #[command(subcommand)]
        action: WatchCommand,
    },

    /// Manage extra project roots
    Paths {
        #[command(subcommand)]
        action: PathsCommand,
    },

    /// Show index size and freshness
    Stats,

    /// List projects found under the roots, most recently active first
    Projects {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List a project's indexed sessions, sidechains excluded
    Sessions {
        /// Project name (default: current directory name)
        project: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show hooks from global and project settings
    Hooks {
        /// Project name or directory (default: current directory)
        #[arg(long)]
        project: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show a project's memory notes
    Memory {
        /// Project name, path or encoded directory (default: current directory)
        project: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum WatchCommand {
    /// List subscriptions with unseen match counts
    List,
    /// Add a subscription and match it against everything indexed
    Add {
        name: String,
        pattern: String,
        /// Display color (default from config)
        #[arg(long)]
        color: Option<String>,
    },
    /// Change a subscription's name and pattern
    Edit { id: i64, name: String, pattern: String },
    /// Delete a subscription and its matches
    Remove { id: i64 },
    /// Enable or disable a subscription
    Toggle { id: i64 },
    /// Mark every match of a subscription seen
    Seen { id: i64 },
    /// Mark every match in a session seen
    SeenSession { session: String },
    /// Show a subscription's matches, newest first
    Matches {
        id: i64,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum PathsCommand {
    /// Show every root that is scanned
    List,
    /// Scan an extra directory of project logs
    Add { dir: PathBuf },
    /// Stop scanning an extra directory
    Remove { dir: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        clog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("clog starting");

    match cli.command.unwrap_or(Command::Live) {
        Command::Live => live::run(&config, open_database()?),
        Command::Index { full, reindex } => run_index(&config, open_database()?, full, reindex),
        Command::Search {
            query,
            scope,
            project,
            session,
            limit,
            sessions,
            format,
        } => {
            let scope = resolve_scope(&config, scope, project, session)?;
            let limit = limit.unwrap_or(config.search.limit);
            let engine = QueryEngine::with_roots(open_database()?, config.project_roots());
            run_search(&engine, &query.join(" "), &scope, limit, sessions, format)
        }
        Command::Watch { action } => run_watch(&config, open_database()?, action),
        Command::Paths { action } => run_paths(&mut config, action),
        Command::Stats => run_stats(open_database()?),
        Command::Projects { format } => run_projects(&config, format),
        Command::Sessions { project, format } => {
            let project = project.or_else(current_project).unwrap_or_default();
            let engine = QueryEngine::with_roots(open_database()?, config.project_roots());
            run_sessions(&engine, &project, format)
        }
        Command::Hooks { project, format } => run_hooks(&config, project, format),
        Command::Memory { project, format } => run_memory(&config, project, format),
    }
}

/// Open the index, creating the schema on first use. Failure here is fatal.
fn open_database() -> Result<Arc<Database>> {
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open index at {}", db_path.display()))?;
    db.migrate().context("failed to create index schema")?;
    Ok(Arc::new(db))
}

/// Run one indexing pass with a progress bar
fn run_index(config: &Config, db: Arc<Database>, full: bool, reindex: bool) -> Result<()> {
    let coordinator = IndexCoordinator::new(db, config.project_roots());

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let on_progress = |p: &IndexProgress| match p.phase {
        IndexPhase::Discovering => pb.set_message("discovering..."),
        IndexPhase::Indexing => {
            pb.set_length(p.total as u64);
            pb.set_position(p.current as u64);
            pb.set_message(
                p.file
                    .as_ref()
                    .and_then(|f| f.file_name())
                    .and_then(|n| n.to_str())
                    .unwrap_or("...")
                    .to_string(),
            );
        }
        IndexPhase::Done => pb.set_position(p.total as u64),
    };

    let summary = if reindex {
        coordinator.reset_and_index_with_progress(on_progress)
    } else if full {
        coordinator.index_all_with_progress(on_progress)
    } else {
        coordinator.index_changed_with_progress(on_progress)
    };
    pb.finish_and_clear();

    let summary = summary.context("indexing failed")?;
    output::print_index_summary(&summary);
    Ok(())
}

/// Bind a scope kind to its target.
///
/// `--session` alone implies local scope. Project scope defaults to the
/// current directory's name.
fn resolve_scope(
    config: &Config,
    kind: Option<ScopeKind>,
    project: Option<String>,
    session: Option<String>,
) -> Result<Scope> {
    let kind = kind.unwrap_or(if session.is_some() {
        ScopeKind::Local
    } else {
        config.search.default_scope
    });

    match kind {
        ScopeKind::Local => match session {
            Some(session) => Ok(Scope::Local(session)),
            None => bail!("--session is required for local scope"),
        },
        ScopeKind::Project => Ok(Scope::Project(
            project.or_else(current_project).unwrap_or_default(),
        )),
        ScopeKind::Global => Ok(Scope::Global),
    }
}

fn current_project() -> Option<String> {
    let cwd = std::env::current_dir().ok()?;
    cwd.file_name().map(|n| n.to_string_lossy().to_string())
}

fn run_search(
    engine: &QueryEngine,
    query: &str,
    scope: &Scope,
    limit: usize,
    sessions: bool,
    format: OutputFormat,
) -> Result<()> {
    if sessions {
        let found = engine
            .search_sessions(query, scope)
            .context("session search failed")?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&found)?),
            OutputFormat::Text => output::print_sessions(&found),
        }
        return Ok(());
    }

    let results = engine.search(query, scope, limit).context("search failed")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            output::print_results(&results);
            let total = engine.match_count(query, scope)?;
            if total as usize > results.len() {
                println!("({} of {} matches shown)", results.len(), total);
            }
        }
    }
    Ok(())
}

fn run_watch(config: &Config, db: Arc<Database>, action: WatchCommand) -> Result<()> {
    let watch = WatchEngine::new(db);

    match action {
        WatchCommand::List => {
            let subs = watch.list_subscriptions()?;
            output::print_subscriptions(&subs);
        }
        WatchCommand::Add {
            name,
            pattern,
            color,
        } => {
            let color = color.unwrap_or_else(|| config.watch.default_color.clone());
            let sub = watch.add_subscription(&name, &pattern, &color)?;
            println!(
                "Added watch {} \"{}\" ({} existing matches)",
                sub.id, sub.name, sub.unseen_count
            );
        }
        WatchCommand::Edit { id, name, pattern } => {
            watch.update_pattern(id, &name, &pattern)?;
            let unseen = watch
                .get_subscription(id)?
                .map(|s| s.unseen_count)
                .unwrap_or(0);
            println!("Updated watch {} ({} matches)", id, unseen);
        }
        WatchCommand::Remove { id } => {
            watch.remove_subscription(id)?;
            println!("Removed watch {}", id);
        }
        WatchCommand::Toggle { id } => {
            let enabled = watch.toggle_subscription(id)?;
            println!(
                "Watch {} {}",
                id,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        WatchCommand::Seen { id } => {
            let n = watch.mark_subscription_seen(id)?;
            println!("Marked {} matches seen", n);
        }
        WatchCommand::SeenSession { session } => {
            let n = watch.mark_session_seen(&session)?;
            println!("Marked {} matches seen", n);
        }
        WatchCommand::Matches { id, limit } => {
            let Some(sub) = watch.get_subscription(id)? else {
                bail!("watch subscription not found: {}", id);
            };
            let matches = watch.matches_for(id, limit)?;
            output::print_matches(&sub, &matches);
        }
    }
    Ok(())
}

fn run_paths(config: &mut Config, action: PathsCommand) -> Result<()> {
    match action {
        PathsCommand::List => output::print_roots(config),
        PathsCommand::Add { dir } => {
            if !dir.is_dir() {
                bail!("not a directory: {}", dir.display());
            }
            let dir = std::fs::canonicalize(&dir)
                .with_context(|| format!("failed to resolve {}", dir.display()))?;
            if config.add_project_path(&dir) {
                config.save().context("failed to save configuration")?;
                println!("Added {}", dir.display());
            } else {
                println!("Already configured: {}", dir.display());
            }
        }
        PathsCommand::Remove { dir } => {
            let resolved = std::fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
            if config.remove_project_path(&resolved) || config.remove_project_path(&dir) {
                config.save().context("failed to save configuration")?;
                println!("Removed {}", dir.display());
            } else {
                bail!("not a configured project path: {}", dir.display());
            }
        }
    }
    Ok(())
}

fn run_stats(db: Arc<Database>) -> Result<()> {
    let stats = db.stats()?;
    let projects = db.list_projects()?;
    let unseen = WatchEngine::new(Arc::clone(&db)).total_unseen()?;
    output::print_stats(&stats, &projects, unseen, &Config::database_path());
    Ok(())
}

fn run_projects(config: &Config, format: OutputFormat) -> Result<()> {
    let projects = claude::discover_projects(&config.project_roots());
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&projects)?),
        OutputFormat::Text => output::print_projects(&projects),
    }
    Ok(())
}

fn run_sessions(engine: &QueryEngine, project: &str, format: OutputFormat) -> Result<()> {
    let sessions = engine
        .project_sessions(project)
        .with_context(|| format!("failed to list sessions for {}", project))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
        OutputFormat::Text => output::print_sessions(&sessions),
    }
    Ok(())
}

/// Find a project by name, recorded path or encoded directory name,
/// defaulting to the current directory.
fn resolve_project(config: &Config, query: Option<String>) -> Result<Project> {
    let query = match query {
        Some(query) => query,
        None => std::env::current_dir()
            .context("failed to read current directory")?
            .to_string_lossy()
            .into_owned(),
    };
    claude::find_project(&config.project_roots(), &query)
        .with_context(|| format!("no project matching {}", query))
}

fn run_hooks(config: &Config, project: Option<String>, format: OutputFormat) -> Result<()> {
    let project_dir = match project {
        Some(query) => match claude::find_project(&config.project_roots(), &query) {
            Some(found) => PathBuf::from(found.path),
            None if Path::new(&query).is_dir() => PathBuf::from(query),
            None => bail!("no project matching {}", query),
        },
        None => std::env::current_dir().context("failed to read current directory")?,
    };

    let sources = claude::load_all_hooks(&config.claude_dir(), Some(&project_dir));
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sources)?),
        OutputFormat::Text => output::print_hooks(&sources),
    }
    Ok(())
}

fn run_memory(config: &Config, project: Option<String>, format: OutputFormat) -> Result<()> {
    let project = resolve_project(config, project)?;
    let files = match claude::load_memory(&project.data_dir) {
        Ok(files) => files,
        Err(clog_core::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read memory for {}", project.name))
        }
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
        OutputFormat::Text => output::print_memory(&project, &files),
    }
    Ok(())
}
