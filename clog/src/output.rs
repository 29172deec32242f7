//! Plain-text rendering for command output.

use chrono::{TimeZone, Utc};
use clog_core::claude::{HooksSource, MemoryFile, Project};
use clog_core::config::normalize_path;
use clog_core::format::{format_relative_str, format_relative_time, format_tokens, truncate_chars};
use clog_core::ingest::IndexSummary;
use clog_core::{Config, IndexStats, SearchResult, SessionSummary, Subscription, WatchMatch};
use std::path::Path;

/// Width of a message excerpt in result lists
const EXCERPT_CHARS: usize = 160;

pub fn print_index_summary(summary: &IndexSummary) {
    println!("Index complete:");
    println!("  Files discovered:  {}", summary.files_discovered);
    println!("  Files indexed:     {}", summary.files_indexed);
    println!("  Files skipped:     {}", summary.files_skipped);
    println!("  Messages inserted: {}", summary.messages_inserted);
    println!("  New watch matches: {}", summary.new_matches);

    if !summary.failures.is_empty() {
        println!("\nErrors ({}):", summary.failures.len());
        for (path, err) in &summary.failures {
            println!("  {}: {}", shorten_path(path), err);
        }
    }
}

pub fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No matches.");
        return;
    }

    for r in results {
        let model = if r.model.is_empty() { "-" } else { &r.model };
        println!(
            "{}  {}  {}  {}  {}  {} tok",
            r.project,
            short_id(&r.session_id),
            format_relative_str(&r.timestamp),
            r.kind,
            model,
            format_tokens(r.input_tokens.saturating_add(r.output_tokens)),
        );
        println!("    {}", excerpt(&r.highlighted));
        if !r.tool_calls.is_empty() {
            println!("    tools: {}", r.tool_calls);
        }
    }
}

pub fn print_sessions(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("No matching sessions.");
        return;
    }

    for s in sessions {
        let branch = if s.git_branch.is_empty() {
            String::new()
        } else {
            format!(" [{}]", s.git_branch)
        };
        println!(
            "{}  {}{}  {}  {} msgs  {} tok",
            short_id(&s.session_id),
            s.project,
            branch,
            format_relative_str(&s.modified_at),
            s.message_count,
            format_tokens(s.total_input_tokens.saturating_add(s.total_output_tokens)),
        );
        if !s.first_prompt.is_empty() {
            println!("    {}", excerpt(&s.first_prompt));
        }
        println!("    {}", shorten_path(&s.path));
    }
}

pub fn print_subscriptions(subs: &[Subscription]) {
    if subs.is_empty() {
        println!("No watch subscriptions.");
        return;
    }

    for sub in subs {
        println!(
            "{:>4}  [{}]  {}  /{}/  {} unseen  {}",
            sub.id,
            if sub.enabled { "on" } else { "off" },
            sub.name,
            sub.pattern,
            sub.unseen_count,
            sub.color,
        );
    }
}

pub fn print_matches(sub: &Subscription, matches: &[WatchMatch]) {
    println!("{} /{}/ ({} unseen)", sub.name, sub.pattern, sub.unseen_count);
    if matches.is_empty() {
        println!("  No matches.");
        return;
    }

    for m in matches {
        println!(
            "  {} {}  {}  {}",
            if m.seen { " " } else { "*" },
            m.project,
            short_id(&m.session_id),
            format_relative_str(&m.timestamp),
        );
        println!("      {}", m.snippet);
    }
}

pub fn print_roots(config: &Config) {
    let default_root = normalize_path(&config.claude_dir().join("projects"));
    for root in config.project_roots() {
        let origin = if root == default_root { "default" } else { "extra" };
        let status = if root.is_dir() { "" } else { "  (missing)" };
        println!("{:<8} {}{}", origin, shorten_path(&root), status);
    }
}

pub fn print_stats(stats: &IndexStats, projects: &[(String, i64)], unseen: i64, db_path: &Path) {
    println!("Index: {}", shorten_path(db_path));
    println!("Logs:  {}", shorten_path(&clog_core::logging::log_file_path()));
    println!("  Files:    {}", stats.file_count);
    println!("  Sessions: {}", stats.session_count);
    println!("  Messages: {}", stats.message_count);
    println!(
        "  Indexed:  {}",
        stats
            .last_indexed_at
            .as_deref()
            .map(format_relative_str)
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Unseen watch matches: {}", unseen);

    if !projects.is_empty() {
        println!("\nProjects:");
        for (project, sessions) in projects {
            println!("  {:<32} {} sessions", project, sessions);
        }
    }
}

pub fn print_projects(projects: &[Project]) {
    if projects.is_empty() {
        println!("No projects found.");
        return;
    }

    for p in projects {
        let active = Utc
            .timestamp_millis_opt(p.last_modified_ms)
            .single()
            .map(format_relative_time)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:>4} sessions  {:<10} {}",
            p.name,
            p.session_count,
            active,
            shorten_path(Path::new(&p.path)),
        );
    }
}

pub fn print_hooks(sources: &[HooksSource]) {
    if sources.is_empty() {
        println!("No hooks configured.");
        return;
    }

    for source in sources {
        println!("{} ({})", source.scope, shorten_path(&source.path));
        for event in &source.events {
            println!("  {}", event.event);
            for hook in event.groups.iter().flat_map(|g| &g.hooks) {
                let matcher: &str = if hook.matcher.is_empty() {
                    "*"
                } else {
                    hook.matcher.as_str()
                };
                let action = if hook.command.is_empty() {
                    &hook.prompt
                } else {
                    &hook.command
                };
                let timeout = hook
                    .timeout
                    .map(|t| format!("  ({}s)", t))
                    .unwrap_or_default();
                println!("    [{}] {}: {}{}", matcher, hook.kind, action, timeout);
            }
        }
    }
}

pub fn print_memory(project: &Project, files: &[MemoryFile]) {
    if files.is_empty() {
        println!("No memory files for {}.", project.name);
        return;
    }

    for (i, file) in files.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("== {} ({}) ==", file.name, shorten_path(&file.path));
        println!("{}", file.content.trim_end());
    }
}

/// One-line excerpt with newlines flattened
pub fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&flat, EXCERPT_CHARS)
}

fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map(|(i, _)| &id[..i]).unwrap_or(id)
}

/// Shorten a path for display by abbreviating the home directory
fn shorten_path(path: &Path) -> String {
    if let Ok(home) = std::env::var("HOME") {
        if let Ok(suffix) = path.strip_prefix(&home) {
            return format!("~/{}", suffix.display());
        }
    }
    path.display().to_string()
}
