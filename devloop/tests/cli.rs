//! CLI tests: spawn the devloop binary and check exit codes and output.

use std::path::Path;
use std::process::{Command, Output};

use devloop::exit_codes;
use devloop::io::backlog::BacklogStore;
use devloop::io::init::{DevloopPaths, InitOptions, init_devloop};
use devloop::test_support::{TestRepo, backlog_of, story};

fn devloop(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_devloop"))
        .current_dir(dir)
        .args(args)
        .env_remove("DEVLOOP_BACKLOG")
        .output()
        .expect("spawn devloop")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn seeded(stories: Vec<devloop::core::types::Story>) -> (tempfile::TempDir, BacklogStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    init_devloop(temp.path(), &InitOptions { force: false }).expect("init");
    let store = BacklogStore::new(DevloopPaths::new(temp.path()).backlog_path);
    store.save(&backlog_of(stories)).expect("save");
    (temp, store)
}

#[test]
fn init_creates_layout_and_refuses_to_repeat() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = devloop(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let paths = DevloopPaths::new(temp.path());
    assert!(paths.backlog_path.exists());
    assert!(paths.config_path.exists());
    assert!(paths.gitignore_path.exists());

    let again = devloop(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    let forced = devloop(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn next_then_pass_then_complete() {
    let (temp, store) = seeded(vec![story("B", 2), story("A", 1)]);

    let output = devloop(temp.path(), &["next"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output).trim(), "A");

    assert_eq!(
        devloop(temp.path(), &["pass", "A"]).status.code(),
        Some(exit_codes::OK)
    );
    assert_eq!(stdout(&devloop(temp.path(), &["next"])).trim(), "B");

    devloop(temp.path(), &["pass", "B"]);
    let done = devloop(temp.path(), &["next"]);
    assert_eq!(done.status.code(), Some(exit_codes::COMPLETE));
    assert_eq!(store.remaining_count().expect("remaining"), 0);
}

#[test]
fn pass_rejects_unknown_story() {
    let (temp, _) = seeded(vec![story("A", 1)]);

    let output = devloop(temp.path(), &["pass", "nope"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown story id"));
}

#[test]
fn status_reports_remaining_over_total() {
    let (temp, store) = seeded(vec![story("A", 1), story("B", 2)]);
    store.mark_passed("A").expect("pass");

    let output = devloop(temp.path(), &["status"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let text = stdout(&output);
    assert!(text.contains("[x] A"));
    assert!(text.contains("[ ] B"));
    assert!(text.contains("1 of 2 remaining"));
}

#[test]
fn validate_flags_duplicate_ids() {
    let (temp, _) = seeded(vec![story("A", 1)]);
    assert_eq!(
        devloop(temp.path(), &["validate"]).status.code(),
        Some(exit_codes::OK)
    );

    let raw = r#"{
        "projectName": "demo",
        "userStories": [
            {"id": "A", "title": "one", "priority": 1, "passes": false},
            {"id": "A", "title": "two", "priority": 2, "passes": false}
        ]
    }"#;
    std::fs::write(DevloopPaths::new(temp.path()).backlog_path, raw).expect("write");

    let output = devloop(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("duplicate story id"));
}

#[test]
fn run_on_dirty_tree_exits_with_dirty_code() {
    let repo = TestRepo::with_stories(vec![story("A", 1)]).expect("repo");
    std::fs::write(repo.root().join("stray.txt"), "wip").expect("write");

    let output = devloop(repo.root(), &["run", "--max-iterations", "1"]);

    assert_eq!(output.status.code(), Some(exit_codes::DIRTY));
    assert!(String::from_utf8_lossy(&output.stderr).contains("stray.txt"));
}
