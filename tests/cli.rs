use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Binary isolated from the user's config, store and editor data
fn tether(home: &Path, cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tether").unwrap();
    cmd.current_dir(cwd)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("TETHER_DB_PATH", home.join("store").join("tether.db"))
        .env_remove("TETHER_DEBUG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn unknown_event_is_a_successful_noop() {
    let home = TempDir::new().unwrap();
    tether(home.path(), home.path())
        .args(["hook", "beforeSubmitPrompt"])
        .write_stdin(r#"{"conversation_id": "c1"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("ignored event 'beforeSubmitPrompt'"));

    assert!(!home.path().join("store").join("tether.db").exists());
}

#[test]
fn file_touched_from_stdin_is_recorded() {
    let home = TempDir::new().unwrap();
    let payload = serde_json::json!({
        "hook_event_name": "afterFileEdit",
        "conversation_id": "c1",
        "file_path": "/work/app/src/a.ts",
        "workspace_roots": ["/work/app"],
        "agent": "cursor"
    });

    for _ in 0..2 {
        tether(home.path(), home.path())
            .arg("hook")
            .write_stdin(payload.to_string())
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "file-touched: recorded conversation c1 (1 captured files)",
            ));
    }

    tether(home.path(), home.path())
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Conversations: 1"));

    tether(home.path(), home.path())
        .args(["conversations", "--file", "a.ts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("c1").and(predicate::str::contains("cursor")));
}

#[test]
fn flags_rescue_a_malformed_payload() {
    let home = TempDir::new().unwrap();
    tether(home.path(), home.path())
        .args([
            "hook",
            "file-touched",
            "--conversation-id",
            "c2",
            "--file",
            "/work/app/lib.rs",
            "--workspace-root",
            "/work/app",
        ])
        .write_stdin("{not json")
        .assert()
        .success()
        .stdout(predicate::str::contains("recorded conversation c2"));

    tether(home.path(), home.path())
        .args(["context", "lib.rs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[direct] c2"));
}

#[test]
fn manual_link_to_unknown_conversation_fails() {
    let home = TempDir::new().unwrap();
    tether(home.path(), home.path())
        .args(["link", "nope", "abc123"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::starts_with("tether: conversation not recorded: nope"));
}

fn git(repo: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(repo)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

#[test]
fn commit_hook_links_the_conversation_that_touched_its_files() {
    if std::process::Command::new("git").arg("--version").output().is_err() {
        return;
    }
    let home = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    let repo = repo.path();

    git(repo, &["init", "-q", "-b", "main"]);
    git(repo, &["config", "user.name", "Ada"]);
    git(repo, &["config", "user.email", "ada@example.com"]);
    git(repo, &["config", "commit.gpgsign", "false"]);
    std::fs::create_dir_all(repo.join("src")).unwrap();
    std::fs::write(repo.join("src/a.ts"), "export const a = 1;\n").unwrap();

    let file = repo.join("src").join("a.ts");
    tether(home.path(), repo)
        .args(["hook", "post-tool-use", "--conversation-id", "c1", "--agent", "claude-code"])
        .arg("--file")
        .arg(&file)
        .arg("--workspace-root")
        .arg(repo)
        .assert()
        .success();

    // Commit times have one-second resolution
    std::thread::sleep(std::time::Duration::from_millis(1100));
    git(repo, &["add", "."]);
    git(repo, &["commit", "-q", "-m", "Add a"]);

    tether(home.path(), repo)
        .args(["hook", "commit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(1 files, 1 linked conversations)"));

    tether(home.path(), repo)
        .args(["links", "conversation", "c1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auto").and(predicate::str::contains("Add a")));

    tether(home.path(), repo)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Links:         1 (1 auto, 0 manual)"));
}
