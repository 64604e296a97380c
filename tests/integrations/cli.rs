use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config_path = dir.join("notifyhub.toml");
    let state_path = dir.join("state.json");
    let toml = format!(
        r#"
log_level = "warn"

[state]
path = "{}"

[[targets]]
id = "console"
name = "Console"
kind = "log"

[[targets]]
name = "Inbox"
kind = "persistent"
"#,
        state_path.display()
    );
    std::fs::write(&config_path, toml).unwrap();
    config_path
}

fn notifyhub(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("notifyhub").unwrap();
    cmd.arg("--config").arg(config).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_list_shows_configured_targets() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    notifyhub(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("console\tConsole"))
        .stdout(predicate::str::contains("inbox\tInbox"))
        .stdout(predicate::str::contains("never"));
}

#[test]
fn test_send_then_list_reports_activation() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    notifyhub(&config)
        .args(["send", "-t", "console", "-m", "hello", "--title", "Greeting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("console\tsent"));

    assert!(dir.path().join("state.json").exists());

    let output = notifyhub(&config)
        .args(["list", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let targets: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let targets = targets.as_array().unwrap();
    let console = targets
        .iter()
        .find(|t| t["identity"] == "console")
        .unwrap();
    assert!(console["last_notified"].is_string());
    let inbox = targets.iter().find(|t| t["identity"] == "inbox").unwrap();
    assert!(inbox["last_notified"].is_null());
}

#[test]
fn test_send_to_unknown_target_fails() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    notifyhub(&config)
        .args(["send", "-t", "nobody", "-m", "hello"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no notify target registered as 'nobody'"));

    assert!(!dir.path().join("state.json").exists());
}

#[test]
fn test_missing_config_file_exits_with_config_error() {
    let dir = tempdir().unwrap();

    notifyhub(&dir.path().join("missing.toml"))
        .arg("list")
        .assert()
        .failure()
        .code(2);
}
