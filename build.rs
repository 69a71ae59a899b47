//! Stamps the binary with its source revision and build time for `bl --version`.
//!
//! `SOURCE_DATE_EPOCH` pins the timestamp for reproducible builds. Outside a
//! git checkout the revision is `unknown`; a dirty tree gets a `-dirty` suffix.

use chrono::{DateTime, Utc};
use std::process::Command;

fn main() {
    for watched in [".git/HEAD", ".git/index"] {
        println!("cargo:rerun-if-changed={watched}");
    }
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    println!("cargo:rustc-env=BL_GIT_COMMIT={}", revision());
    println!(
        "cargo:rustc-env=BL_BUILD_TIMESTAMP={}",
        build_time().format("%Y-%m-%dT%H:%M:%SZ")
    );
}

fn revision() -> String {
    let Some(hash) = git(&["rev-parse", "--short=10", "HEAD"]) else {
        return "unknown".to_string();
    };
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => format!("{hash}-dirty"),
        _ => hash,
    }
}

fn build_time() -> DateTime<Utc> {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

/// Trimmed stdout of a successful git invocation.
fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok().map(|s| s.trim().to_string())
}
