//! Tests of the `bsync` binary

mod common;

use common::Workspace;

/// Generator that appends its targets to `generated.txt`
const RECORDING_CONFIG: &str = r#"
[generator]
command = ["sh", "-c", 'printf "%s\n" "$@" >> generated.txt', "gen"]

[watch]
debounce_ms = 50
"#;

fn root_arg(workspace: &Workspace) -> String {
    workspace.root().display().to_string()
}

fn generated(workspace: &Workspace) -> Vec<String> {
    std::fs::read_to_string(workspace.path("generated.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_status_without_daemon() {
    let workspace = Workspace::new();
    let root = root_arg(&workspace);
    let root = root.as_str();

    let result = bsync!(workspace.root(), "--root", root, "status")
        .assert_success()
        .unwrap();
    assert!(result.contains_stdout("Not running"));

    let result = bsync!(workspace.root(), "--root", root, "--json", "status")
        .assert_success()
        .unwrap();
    assert_eq!(result.json().unwrap()["running"], false);
}

#[test]
fn test_stop_and_ping_without_daemon() {
    let workspace = Workspace::new();
    let root = root_arg(&workspace);
    let root = root.as_str();

    let result = bsync!(workspace.root(), "--root", root, "stop")
        .assert_success()
        .unwrap();
    assert!(result.contains_stdout("Daemon is not running"));

    let result = bsync!(workspace.root(), "--root", root, "ping")
        .assert_failure()
        .unwrap();
    assert!(result.contains_stderr("daemon not running"));
}

#[test]
fn test_update_runs_locally_without_daemon() {
    let workspace = Workspace::new();
    workspace.write_config(RECORDING_CONFIG);
    let root = root_arg(&workspace);
    let root = root.as_str();

    let result = bsync!(workspace.root(), "--root", root, "update")
        .assert_success()
        .unwrap();
    assert!(result.contains_stdout("Updated"));
    assert_eq!(generated(&workspace), vec!["//..."]);

    // The tracker state persisted by the first run makes this a no-op
    let result = bsync!(workspace.root(), "--root", root, "update", "--incremental")
        .assert_success()
        .unwrap();
    assert!(result.contains_stdout("Nothing to update"));
    assert_eq!(generated(&workspace).len(), 1);

    workspace.write("tools/lint.py", "print('lint')\n");
    bsync!(workspace.root(), "--root", root, "update", "--incremental")
        .assert_success()
        .unwrap();
    assert_eq!(generated(&workspace), vec!["//...", "//tools:all"]);
}

#[test]
fn test_failing_generator_exits_nonzero() {
    let workspace = Workspace::new();
    workspace.write_config(
        r#"
[generator]
command = ["sh", "-c", "echo broken BUILD file >&2; exit 3"]
"#,
    );
    let root = root_arg(&workspace);
    let root = root.as_str();

    let result = bsync!(workspace.root(), "--root", root, "update")
        .assert_failure()
        .unwrap();
    assert!(result.contains_stderr("broken BUILD file"));
}

#[test]
fn test_unknown_language_is_rejected() {
    let workspace = Workspace::new();
    let root = root_arg(&workspace);
    let root = root.as_str();

    let result = bsync!(workspace.root(), "--root", root, "--languages", "go,cobol", "status")
        .assert_failure()
        .unwrap();
    assert!(result.contains_stderr("unknown language 'cobol'"));
}

#[test]
fn test_start_ping_stop_round_trip() {
    let workspace = Workspace::new();
    workspace.write_config(RECORDING_CONFIG);
    let root = root_arg(&workspace);
    let root = root.as_str();

    let result = bsync!(workspace.root(), "--root", root, "start")
        .assert_success()
        .unwrap();
    assert!(result.contains_stdout("Daemon started"));

    let ping = bsync!(workspace.root(), "--root", root, "--json", "ping").execute();
    let status = bsync!(workspace.root(), "--root", root, "--json", "status").execute();
    let update = bsync!(workspace.root(), "--root", root, "--json", "update").execute();

    // Always stop before asserting so a failure does not leak the daemon
    let stop = bsync!(workspace.root(), "--root", root, "stop")
        .assert_success()
        .unwrap();
    assert!(stop.contains_stdout("Daemon stopped"));

    let ping = ping.unwrap();
    assert!(ping.success(), "ping failed: {}", ping.stderr);
    assert_eq!(ping.json().unwrap()["pong"], true);

    let status = status.unwrap().json().unwrap();
    assert_eq!(status["running"], true);
    assert_eq!(status["watch"]["running"], false);
    assert_eq!(status["status"]["tracked_files"], 3);

    let update = update.unwrap().json().unwrap();
    assert_eq!(update["updated"], serde_json::json!(["."]));
    assert_eq!(generated(&workspace), vec!["//..."]);

    assert!(!workspace.path(".bsync/daemon.sock").exists());
    assert!(workspace.path(".bsync/logs/daemon.log").exists());
}
