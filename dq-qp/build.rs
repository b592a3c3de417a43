//! Build script for dq-qp
//!
//! Captures build identification reported by `/health` and the startup log:
//! git commit hash (short form), build timestamp, build profile.

use std::process::Command;

fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let build_timestamp = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=DQ_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=DQ_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=DQ_BUILD_PROFILE={}", profile);
    println!("cargo:rerun-if-changed=build.rs");
}
