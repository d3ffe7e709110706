//! Drives the `herald` binary against a file store, one process per command
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{path::Path, process::Output};

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = dir.path().join("store");
        std::fs::write(
            dir.path().join("herald.config.ron"),
            format!(
                "Herald (\n    store: File(path: {:?}),\n    transport: Log,\n    rate_limit: (messages_per_second: 100.0, burst_size: 100),\n)\n",
                store.display().to_string()
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn config(&self) -> std::path::PathBuf {
        self.dir.path().join("herald.config.ron")
    }

    fn run(&self, args: &[&str]) -> Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_herald"))
            .arg("--config")
            .arg(self.config())
            .args(args)
            .env("LOG_LEVEL", "off")
            .env_remove("HERALD_CONFIG")
            .output()
            .expect("Failed to run herald")
    }

    fn stdout(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "herald {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path_str(&path)
    }
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

/// The id at the end of an "Added ... <id> ..." line
fn added_id(stdout: &str) -> String {
    stdout
        .split_whitespace()
        .nth(2)
        .expect("no id in output")
        .to_string()
}

#[test]
fn test_campaign_lifecycle_across_processes() {
    let workspace = Workspace::new();

    for email in ["a@example.com", "b@example.com", "c@example.com"] {
        let stdout = workspace.stdout(&["add-subscriber", email]);
        assert!(stdout.starts_with("Added subscriber "), "{stdout}");
    }

    let content = workspace.write("issue.html", "<p>Issue 1</p>");
    let stdout = workspace.stdout(&["add-campaign", "Issue 1", "--content", &content, "--ready"]);
    let campaign = added_id(&stdout);

    let stdout = workspace.stdout(&["tick"]);
    assert!(stdout.contains(&format!("Enqueued:  {campaign}")), "{stdout}");
    assert!(stdout.contains("Delivered: 3\n"), "{stdout}");
    assert!(stdout.contains(&format!("Finished:  {campaign} (sent)")), "{stdout}");

    let stdout = workspace.stdout(&["status", "--campaign", &campaign]);
    assert!(stdout.contains("Sent:      3\n"), "{stdout}");
    assert!(stdout.contains("Total:     3\n"), "{stdout}");

    let stdout = workspace.stdout(&["track", &campaign, "open"]);
    assert_eq!(stdout, format!("Campaign {campaign}: 1 open(s)\n"));

    let stdout = workspace.stdout(&["show", &campaign]);
    assert!(stdout.contains("Status:    sent\n"), "{stdout}");
    assert!(stdout.contains("Opened:    1\n"), "{stdout}");
}

#[test]
fn test_invalid_transition_fails() {
    let workspace = Workspace::new();
    let content = workspace.write("draft.html", "<p>draft</p>");
    let campaign = added_id(&workspace.stdout(&["add-campaign", "Draft", "--content", &content]));

    let output = workspace.run(&["pause", &campaign]);
    assert!(!output.status.success());
    assert!(
        String::from_utf8_lossy(&output.stderr)
            .contains("Invalid campaign transition from draft to paused")
    );
}

#[test]
fn test_missing_config_fails() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_herald"))
        .args(["--config", "/nowhere/herald.config.ron", "tick"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Config file does not exist"));
}
