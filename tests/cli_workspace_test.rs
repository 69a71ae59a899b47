//! Integration tests for workspace bindings and conflict checks via CLI.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_start_records_workspace_and_branch() {
    let env = TestEnv::init();
    let id = env.add_item("Work");

    env.bl()
        .args(["item", "start", &id, "--workspace", "/work/a", "--branch", "feat/a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"worktree\":\"/work/a\""));

    let show = env.json(&["item", "show", &id]);
    assert_eq!(show["worktree"], "/work/a");
    assert_eq!(show["branch"], "feat/a");
    assert_eq!(show["activelyWorking"], true);
}

#[test]
fn test_second_start_in_same_workspace_warns() {
    let env = TestEnv::init();
    let a = env.add_item("A");
    let b = env.add_item("B");
    env.bl()
        .args(["item", "start", &a, "--workspace", "/work/shared"])
        .assert()
        .success();

    let output = env
        .bl()
        .args(["item", "start", &b, "--workspace", "/work/shared"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let started = common::parse_json(&output.stdout);
    assert_eq!(started["conflict"]["id"], a.as_str());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Workspace conflict"));

    // The warning never blocks the start.
    assert_eq!(env.json(&["item", "show", &b])["status"], "in_progress");
}

#[test]
fn test_check_reports_active_entry() {
    let env = TestEnv::init();
    let a = env.add_item("A");
    env.bl()
        .args(["item", "start", &a, "--workspace", "/work/x"])
        .assert()
        .success();

    let busy = env.json(&["workspace", "check", "--path", "/work/x"]);
    assert_eq!(busy["conflict"]["id"], a.as_str());

    // The entry itself is never its own conflict.
    let own = env.json(&["workspace", "check", &a, "--path", "/work/x"]);
    assert!(own["conflict"].is_null());

    let free = env.json(&["workspace", "check", "--path", "/work/y"]);
    assert!(free["conflict"].is_null());
}

#[test]
fn test_check_without_workspace_fails() {
    let env = TestEnv::init();
    env.bl()
        .args(["workspace", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--workspace"));
}

#[test]
fn test_link_and_unlink() {
    let env = TestEnv::init();
    let id = env.add_item("Work");

    let linked = env.json(&["workspace", "link", &id, "--path", "/work/z"]);
    assert_eq!(linked["worktree"], "/work/z");
    assert_eq!(env.json(&["item", "show", &id])["worktree"], "/work/z");

    env.bl().args(["workspace", "unlink", &id]).assert().success();
    assert!(env.json(&["item", "show", &id])["worktree"].is_null());
}

#[test]
fn test_workspace_from_git_root() {
    let env = TestEnv::init();
    std::fs::create_dir(env.repo_path().join(".git")).unwrap();
    let nested = env.repo_path().join("src").join("deep");
    std::fs::create_dir_all(&nested).unwrap();
    let id = env.add_item("Work");

    env.bl()
        .current_dir(&nested)
        .args(["item", "start", &id])
        .assert()
        .success();

    let show = env.json(&["item", "show", &id]);
    let expected = env.repo_path().canonicalize().unwrap();
    assert_eq!(show["worktree"], expected.to_str().unwrap());
}

#[test]
fn test_completion_releases_workspace() {
    let env = TestEnv::init();
    let a = env.add_item("A");
    let b = env.add_item("B");
    env.bl()
        .args(["item", "start", &a, "--workspace", "/work/q"])
        .assert()
        .success();
    env.bl().args(["item", "complete", &a]).assert().success();

    let started = env.json(&["item", "start", &b, "--workspace", "/work/q"]);
    assert!(started.get("conflict").is_none());
}
