use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output.status.success().then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"));
    if let Some(hash) = git(&["rev-parse", "--short=10", "HEAD"]) {
        println!("cargo:rustc-env=GIT_HASH={hash}");
    }
}
