use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const NOTES_BLOB: &str = "Trip|||SEP|||<div>Flight at <b>9am</b></div>|||SEP|||2024-01-01|||SEP|||2024-01-02|||SEP|||Travel|||END|||\
Groceries|||SEP|||milk, eggs|||SEP|||2024-02-01|||SEP|||2024-02-01|||SEP|||Home|||END|||";

fn memex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("memex");
    path
}

/// Temp dir with a config whose notes connector `cat`s an export file.
fn setup_test_env(notes_export: &str, extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let export_path = root.join("notes_export.txt");
    fs::write(&export_path, notes_export).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/memex.sqlite"

[retrieval]
n_results = 2

[connectors.notes]
ignore_empty_title = true
command = ["cat", "{export}"]
{extra}
"#,
        root = root.display(),
        export = export_path.display(),
        extra = extra,
    );

    let config_path = config_dir.join("memex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_memex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = memex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run memex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("", "");

    let (stdout, stderr, success) = run_memex(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/memex.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (_, _, success1) = run_memex(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_memex(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_memex(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_sources() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (stdout, _, success) = run_memex(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("notes"));
    assert!(stdout.contains("COLLECTION"));
    assert!(stdout.contains("command: cat"));
    assert!(stdout.contains("NOT CONFIGURED"));
}

#[test]
fn test_sources_mail_without_credentials() {
    let extra = r#"
[connectors.mail]
address_env = "MEMEX_IT_UNSET_ADDRESS"
key_env = "MEMEX_IT_UNSET_KEY"
"#;
    let (_tmp, config_path) = setup_test_env("", extra);

    let (stdout, _, success) = run_memex(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("NO CREDENTIALS"));
    assert!(stdout.contains("imap.mail.me.com:993"));
}

#[test]
fn test_sync_empty_export_succeeds() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (stdout, stderr, success) = run_memex(&config_path, &["sync", "notes"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("sync notes"));
    assert!(stdout.contains("documents: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_sync_all_skips_unconfigured_mail() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (stdout, stderr, success) = run_memex(&config_path, &["sync", "all", "--flush"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("sync notes"));
    assert!(stdout.contains("mode: flush"));
    assert!(!stdout.contains("sync mails"));
}

#[test]
fn test_sync_reports_index_failure_without_embeddings() {
    let (_tmp, config_path) = setup_test_env(NOTES_BLOB, "");

    let (stdout, stderr, success) = run_memex(&config_path, &["sync", "notes"]);
    assert!(!success, "sync should fail with embeddings disabled");
    assert!(stdout.contains("documents: 2"));
    assert!(stdout.contains("written: 0"));
    assert!(stdout.contains("disabled"), "stdout={}", stdout);
    assert!(stderr.contains("failed to sync"));
}

#[test]
fn test_sync_failing_export_command() {
    let (_tmp, config_path) = setup_test_env("", "");
    let content = fs::read_to_string(&config_path).unwrap();
    let broken = content.replace(r#"command = ["cat","#, r#"command = ["memex-no-such-program","#);
    fs::write(&config_path, broken).unwrap();

    let (stdout, _, success) = run_memex(&config_path, &["sync", "notes"]);
    assert!(!success);
    assert!(stdout.contains("error"));
}

#[test]
fn test_sync_unconfigured_source() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (_, stderr, success) = run_memex(&config_path, &["sync", "mails"]);
    assert!(!success);
    assert!(stderr.contains("not configured"));
}

#[test]
fn test_unknown_source() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (_, stderr, success) = run_memex(&config_path, &["sync", "slack"]);
    assert!(!success);
    assert!(stderr.contains("Unknown source"));
}

#[test]
fn test_search_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (_, stderr, success) = run_memex(&config_path, &["search", "flight"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env("", "");

    let (stdout, _, success) = run_memex(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_ask_requires_api_key() {
    let extra = r#"
[llm]
api_key_env = "MEMEX_IT_UNSET_API_KEY"
"#;
    let (_tmp, config_path) = setup_test_env("", extra);

    let (_, stderr, success) = run_memex(&config_path, &["ask", "when is my flight?"]);
    assert!(!success);
    assert!(stderr.contains("MEMEX_IT_UNSET_API_KEY"));
}
