use clog_core::Database;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    claude_dir: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let claude_dir = home.join(".claude");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        seed_fixture(&claude_dir, "-home-dev-webapp", "sess-deploy", "deploy-session.jsonl");

        Self {
            _temp_dir: temp_dir,
            home,
            claude_dir,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("clog/index.db")
    }

    fn config_path(&self) -> PathBuf {
        self.xdg_config.join("clog/config.toml")
    }
}

fn seed_fixture(claude_dir: &Path, project_dir: &str, session: &str, fixture: &str) {
    let source = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../clog-core/tests/fixtures")
        .join(fixture);
    let target = claude_dir
        .join("projects")
        .join(project_dir)
        .join(format!("{session}.jsonl"));

    fs::create_dir_all(target.parent().expect("missing fixture parent"))
        .expect("failed to create fixture directories");
    fs::copy(source, target).expect("failed to copy fixture");
}

fn run_clog(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("clog"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("CLAUDE_CONFIG_DIR", &env.claude_dir)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute clog: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "clog {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_ok(env: &CliTestEnv, args: &[&str]) -> String {
    let output = run_clog(env, args);
    assert_success(args, &output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn index_populates_database() {
    let env = CliTestEnv::new();

    let stdout = run_ok(&env, &["index"]);
    assert!(
        stdout.contains("Index complete:"),
        "expected index summary in stdout, got:\n{stdout}"
    );
    assert!(stdout.contains("Files indexed:     1"));

    let db_path = env.db_path();
    assert!(
        db_path.exists(),
        "database file should exist at {}",
        db_path.display()
    );

    let db = Database::open(&db_path).expect("failed to open db");
    assert_eq!(db.message_count().expect("failed to count messages"), 6);

    let again = run_ok(&env, &["index"]);
    assert!(again.contains("Files indexed:     0"));
    assert!(again.contains("Files skipped:     1"));
}

#[test]
fn search_finds_indexed_messages() {
    let env = CliTestEnv::new();
    run_ok(&env, &["index"]);

    let stdout = run_ok(&env, &["search", "deploy", "--scope", "global"]);
    assert!(stdout.contains("webapp"), "got:\n{stdout}");
    assert!(stdout.contains("<<deploy>>"), "got:\n{stdout}");

    let json = run_ok(
        &env,
        &["search", "type:user", "--project", "webapp", "--format", "json"],
    );
    let results: serde_json::Value = serde_json::from_str(&json).expect("invalid json output");
    assert_eq!(results.as_array().map(Vec::len), Some(2));

    let sessions = run_ok(&env, &["search", "tool:Read", "--scope", "global", "--sessions"]);
    assert!(sessions.contains("sess-dep"), "got:\n{sessions}");
}

#[test]
fn local_scope_requires_session() {
    let env = CliTestEnv::new();

    let output = run_clog(&env, &["search", "deploy", "--scope", "local"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--session"), "got:\n{stderr}");
}

#[test]
fn watch_lifecycle() {
    let env = CliTestEnv::new();
    run_ok(&env, &["index"]);

    let added = run_ok(&env, &["watch", "add", "deploys", "deploy"]);
    assert!(added.contains("(1 existing matches)"), "got:\n{added}");

    let list = run_ok(&env, &["watch", "list"]);
    assert!(list.contains("deploys"));
    assert!(list.contains("1 unseen"));

    let matches = run_ok(&env, &["watch", "matches", "1"]);
    assert!(matches.contains("webapp"));
    assert!(matches.contains("deploy the staging build"));

    run_ok(&env, &["watch", "seen", "1"]);
    let list = run_ok(&env, &["watch", "list"]);
    assert!(list.contains("0 unseen"));

    let toggled = run_ok(&env, &["watch", "toggle", "1"]);
    assert!(toggled.contains("disabled"));

    run_ok(&env, &["watch", "remove", "1"]);
    let list = run_ok(&env, &["watch", "list"]);
    assert!(list.contains("No watch subscriptions."));
}

#[test]
fn invalid_watch_pattern_is_rejected() {
    let env = CliTestEnv::new();

    let output = run_clog(&env, &["watch", "add", "bad", "[unclosed"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid regex"), "got:\n{stderr}");

    let list = run_ok(&env, &["watch", "list"]);
    assert!(list.contains("No watch subscriptions."));
}

#[test]
fn paths_add_and_remove() {
    let env = CliTestEnv::new();
    let extra = env.home.join("more-logs");
    fs::create_dir_all(&extra).expect("failed to create extra root");
    let extra_str = extra.to_string_lossy().into_owned();

    run_ok(&env, &["paths", "add", &extra_str]);
    let config = fs::read_to_string(env.config_path()).expect("config should be written");
    assert!(config.contains("more-logs"));

    let list = run_ok(&env, &["paths", "list"]);
    assert!(list.contains("more-logs"));
    assert!(list.contains("default"));

    run_ok(&env, &["paths", "remove", &extra_str]);
    let list = run_ok(&env, &["paths", "list"]);
    assert!(!list.contains("more-logs"));

    let missing = env.home.join("nope");
    let output = run_clog(&env, &["paths", "add", &missing.to_string_lossy()]);
    assert!(!output.status.success());
}

#[test]
fn stats_reports_counts() {
    let env = CliTestEnv::new();
    run_ok(&env, &["index"]);

    let stdout = run_ok(&env, &["stats"]);
    assert!(stdout.contains("Messages: 6"), "got:\n{stdout}");
    assert!(stdout.contains("Sessions: 1"));
    assert!(stdout.contains("webapp"));
}

fn write_file(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().expect("missing parent")).expect("failed to create dirs");
    fs::write(path, content).expect("failed to write file");
}

#[test]
fn sidechain_sessions_are_not_listed() {
    let env = CliTestEnv::new();
    seed_fixture(&env.claude_dir, "-home-dev-webapp", "sess-agent", "deploy-session.jsonl");
    write_file(
        &env.claude_dir.join("projects/-home-dev-webapp/sessions-index.json"),
        r#"{"version":1,"entries":[
            {"sessionId":"sess-deploy","fileMtime":2000,"isSidechain":false},
            {"sessionId":"sess-agent","fileMtime":3000,"isSidechain":true}
        ]}"#,
    );
    run_ok(&env, &["index"]);

    let listed = run_ok(&env, &["sessions", "webapp"]);
    assert!(listed.contains("sess-dep"), "got:\n{listed}");
    assert!(!listed.contains("sess-age"), "got:\n{listed}");

    let found = run_ok(&env, &["search", "deploy", "--scope", "global", "--sessions"]);
    assert!(found.contains("sess-dep"), "got:\n{found}");
    assert!(!found.contains("sess-age"), "got:\n{found}");

    let projects = run_ok(&env, &["projects"]);
    assert!(projects.contains("webapp"), "got:\n{projects}");
    assert!(projects.contains("1 sessions"), "got:\n{projects}");
}

#[test]
fn hooks_lists_global_and_project_settings() {
    let env = CliTestEnv::new();
    write_file(
        &env.claude_dir.join("settings.json"),
        r#"{"hooks":{"PreToolUse":[{"matcher":"Bash","hooks":[{"type":"command","command":"guard.sh","timeout":30}]}]}}"#,
    );
    let project = env.home.join("work/app");
    write_file(
        &project.join(".claude/settings.local.json"),
        r#"{"hooks":{"Stop":[{"hooks":[{"type":"command","command":"notify done"}]}]}}"#,
    );

    let stdout = run_ok(&env, &["hooks", "--project", &project.to_string_lossy()]);
    assert!(stdout.contains("global ("), "got:\n{stdout}");
    assert!(stdout.contains("[Bash] command: guard.sh  (30s)"), "got:\n{stdout}");
    assert!(stdout.contains("project-local ("), "got:\n{stdout}");
    assert!(stdout.contains("[*] command: notify done"), "got:\n{stdout}");

    let missing = run_clog(&env, &["hooks", "--project", "no-such-project"]);
    assert!(!missing.status.success());
}

#[test]
fn memory_shows_main_file_first() {
    let env = CliTestEnv::new();
    let memory = env.claude_dir.join("projects/-home-dev-webapp/memory");
    write_file(&memory.join("deploy.md"), "Staging needs a manual approval.");
    write_file(&memory.join("MEMORY.md"), "# Webapp notes");

    let stdout = run_ok(&env, &["memory", "webapp"]);
    let main = stdout.find("== MEMORY.md").expect("MEMORY.md missing");
    let other = stdout.find("== deploy.md").expect("deploy.md missing");
    assert!(main < other, "got:\n{stdout}");
    assert!(stdout.contains("manual approval"));

    fs::remove_dir_all(&memory).expect("failed to remove memory");
    let stdout = run_ok(&env, &["memory", "webapp"]);
    assert!(stdout.contains("No memory files for webapp."), "got:\n{stdout}");
}
