//! CLI contract tests.

use assert_cmd::Command;

fn warden() -> Command {
    match Command::cargo_bin("warden") {
        Ok(cmd) => cmd,
        Err(err) => panic!("warden binary should build: {err}"),
    }
}

#[test]
fn help_lists_subcommands() {
    let output = warden().arg("--help").output().expect("run warden --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("start"));
    assert!(stdout.contains("check"));
    assert!(stdout.contains("--config"));
}

#[test]
fn missing_subcommand_is_rejected() {
    warden().assert().failure();
}

#[test]
fn missing_explicit_config_fails() {
    let output = warden()
        .args(["--config", "/nonexistent/warden.toml", "check"])
        .output()
        .expect("run warden check");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read warden config"));
}

#[test]
fn invalid_config_fails_validation() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("warden.toml");
    std::fs::write(&path, "[schedule]\nfast_tick_ms = 1\n").expect("write config");

    let output = warden()
        .arg("--config")
        .arg(&path)
        .arg("check")
        .output()
        .expect("run warden check");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("fast_tick_ms"));
}

#[cfg(target_os = "linux")]
#[test]
fn check_prints_assessment_json() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("warden.toml");
    std::fs::write(
        &path,
        format!("[paths]\nbase_dir = {:?}\n", dir.path().display().to_string()),
    )
    .expect("write config");
    std::fs::write(dir.path().join("procprotect.txt"), "no-such-process-xyz\n")
        .expect("write protected list");

    let output = warden()
        .arg("--config")
        .arg(&path)
        .arg("check")
        .output()
        .expect("run warden check");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["protected"][0]["entry"], "no-such-process-xyz");
    assert_eq!(json["protected"][0]["failure"], "missing");
    assert!(json["network_connected"].is_boolean());
}
