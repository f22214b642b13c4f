use std::process::Command;

fn main() {
    // Detect if this is a release build
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let is_release = profile == "release";

    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

    // Get git commit hash if available
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    // Which zip backend was compiled in
    let zip_backend = if std::env::var_os("CARGO_FEATURE_ZIP").is_some() {
        "embedded"
    } else {
        "system"
    };

    println!("cargo:rustc-env=STREAMSTACK_VERSION={}", version);
    println!(
        "cargo:rustc-env=STREAMSTACK_PROFILE={}",
        if is_release { "release" } else { "development" }
    );
    println!("cargo:rustc-env=STREAMSTACK_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=STREAMSTACK_ZIP_DEFAULT={}", zip_backend);

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PROFILE");
}
