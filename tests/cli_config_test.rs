//! Integration tests for configuration via CLI.

mod common;

use common::TestEnv;
use predicates::prelude::*;
use serde_json::Value;

fn entry<'a>(show: &'a Value, key: &str) -> &'a Value {
    show["entries"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["key"] == key)
        .unwrap()
}

#[test]
fn test_show_works_before_init() {
    let env = TestEnv::new();
    let show = env.json(&["config", "show"]);
    let team = entry(&show, "team");
    assert_eq!(team["value"], "platform");
    assert_eq!(team["source"], "env:BL_TEAM");
    assert_eq!(entry(&show, "id-prefix")["source"], "derived");
    assert_eq!(entry(&show, "sync-endpoint")["source"], "unset");
}

#[test]
fn test_team_flag_beats_env() {
    let env = TestEnv::new();
    let show = env.json(&["config", "show", "--team", "infra"]);
    let team = entry(&show, "team");
    assert_eq!(team["value"], "infra");
    assert_eq!(team["source"], "cli");
}

#[test]
fn test_set_prefix_changes_new_ids() {
    let env = TestEnv::init();
    env.bl()
        .args(["config", "set", "id-prefix", "core"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"value\":\"CORE\""));

    assert_eq!(env.add_item("Renamed"), "CORE-0001");
    let show = env.json(&["config", "show"]);
    assert_eq!(entry(&show, "id-prefix")["source"], "team");
}

#[test]
fn test_default_priority_applies_to_new_items() {
    let env = TestEnv::init();
    env.bl()
        .args(["config", "set", "default-priority", "critical"])
        .assert()
        .success();
    let id = env.add_item("Urgent");
    assert_eq!(env.json(&["item", "show", &id])["priority"], "critical");

    // An explicit flag still wins.
    env.bl()
        .args(["item", "add", "Later", "-p", "low"])
        .assert()
        .success();
    assert_eq!(env.json(&["item", "show", "2"])["priority"], "low");
}

#[test]
fn test_set_rejects_bad_values() {
    let env = TestEnv::init();
    env.bl()
        .args(["config", "set", "id-prefix", "toolong"])
        .assert()
        .failure();
    env.bl()
        .args(["config", "set", "default-priority", "urgent"])
        .assert()
        .failure();
    env.bl()
        .args(["config", "set", "editor", "vim"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config error"));
}

#[test]
fn test_empty_value_unsets() {
    let env = TestEnv::init();
    env.bl()
        .args(["config", "set", "id-prefix", "CORE"])
        .assert()
        .success();
    env.bl()
        .args(["config", "set", "id-prefix", ""])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"value\":null"));
    let show = env.json(&["config", "show"]);
    assert_eq!(entry(&show, "id-prefix")["value"], "PLAT");
}

#[test]
fn test_system_team_used_without_env() {
    let env = TestEnv::new();
    env.bl()
        .args(["config", "set", "team", "search"])
        .assert()
        .success();
    assert!(env
        .config_dir
        .path()
        .join("backlog")
        .join("config.kdl")
        .exists());

    env.bl()
        .env_remove("BL_TEAM")
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"team\":\"search\""));
}

#[test]
fn test_sync_endpoint_env_source() {
    let env = TestEnv::new();
    let output = env
        .bl()
        .env("BL_SYNC_ENDPOINT", "http://127.0.0.1:9")
        .args(["config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let show = common::parse_json(&output.stdout);
    let endpoint = entry(&show, "sync-endpoint");
    assert_eq!(endpoint["value"], "http://127.0.0.1:9");
    assert_eq!(endpoint["source"], "env:BL_SYNC_ENDPOINT");
}

#[test]
fn test_unreachable_endpoint_never_fails_commands() {
    let env = TestEnv::init();
    env.bl()
        .env("BL_SYNC_ENDPOINT", "http://127.0.0.1:9")
        .args(["item", "add", "Offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PLAT-0001"));
}
