// Shared by the build.rs of every binary/cdylib crate via `include!`.

use std::process::Command;

/// Run `git` with `args` and return trimmed stdout, or an empty string when
/// git is unavailable or the command fails (e.g. building from a tarball).
fn git_output(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

pub fn emit_git_metadata() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../build/shared_git_metadata.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/refs");
    println!("cargo:rerun-if-changed=../.git/packed-refs");
    println!("cargo:rerun-if-env-changed=VIDTHUMB_RELEASE_VERSION");

    let commit = git_output(&["rev-parse", "--short=12", "HEAD"]);
    println!("cargo:rustc-env=GIT_COMMIT={commit}");

    // Packagers building outside a git checkout can supply the release tag.
    let release = std::env::var("VIDTHUMB_RELEASE_VERSION")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| git_output(&["tag", "--points-at", "HEAD"]));
    println!("cargo:rustc-env=RELEASE_VERSION={release}");
}
