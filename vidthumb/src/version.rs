use crate::encode::WEBP_SUPPORTED;

/// Output encodings compiled into this build, as shown by `--version`.
pub fn supported_formats() -> &'static str {
    if WEBP_SUPPORTED { "jpeg, png, webp" } else { "jpeg, png" }
}

pub fn print_cli_version_banner(tool_name: &str, version: &str, release: &str, commit: &str) {
    println!("{tool_name}");
    println!("License: GNU AGPL v3 (AGPL-3.0-only)");
    println!();

    println!("\tVersion:     {version}");
    if !release.is_empty() {
        println!("\tGit tag:     {release}");
    }
    if !commit.is_empty() {
        println!("\tGit commit:  {commit}");
    }
    println!("\tFormats:     {}", supported_formats());
}
