//! Coverage for config parsing, validation and path resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use warden::config::{load_config, load_or_default, PolicyPaths, WardenConfig};

fn parse(toml_str: &str) -> WardenConfig {
    match toml::from_str::<WardenConfig>(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err}"),
    }
}

#[test]
fn empty_config_uses_stock_defaults() {
    let config = parse("");
    assert_eq!(config.schedule.fast_tick(), Duration::from_millis(500));
    assert_eq!(config.schedule.slow_tick(), Duration::from_secs(11));
    assert_eq!(config.escalation.protected_failure_ticks, 80);
    assert_eq!(config.escalation.network_failure_ticks, 120);
    assert_eq!(config.host.call_timeout(), Duration::from_secs(5));
    assert_eq!(config.host.min_uid, 1000);
    assert_eq!(config.refresh.max_body_bytes, 1_048_576);
    assert_eq!(config.paths.forbidden_list, PathBuf::from("proclist.txt"));
    assert_eq!(config.paths.protected_list, PathBuf::from("procprotect.txt"));
    assert_eq!(config.paths.remote_url, PathBuf::from("urlcfg.txt"));
    assert_eq!(config.paths.authorized_users, PathBuf::from("userlist.txt"));
    assert!(config.validate().is_ok());
}

#[test]
fn partial_sections_keep_remaining_defaults() {
    let config = parse(
        r#"
[schedule]
fast_tick_ms = 250

[escalation]
network_failure_ticks = 600
"#,
    );
    assert_eq!(config.schedule.fast_tick_ms, 250);
    assert_eq!(config.schedule.slow_tick_secs, 11);
    assert_eq!(config.escalation.protected_failure_ticks, 80);
    assert_eq!(config.escalation.network_failure_ticks, 600);
}

#[test]
fn paths_resolve_against_base_dir() {
    let config = parse(
        r#"
[paths]
base_dir = "/opt/warden"
forbidden_list = "lists/deny.txt"
authorized_users = "/etc/warden/users.txt"
"#,
    );
    let paths = match config.policy_paths() {
        Ok(paths) => paths,
        Err(err) => panic!("paths should resolve: {err}"),
    };
    assert_eq!(
        paths,
        PolicyPaths {
            forbidden_list: PathBuf::from("/opt/warden/lists/deny.txt"),
            protected_list: PathBuf::from("/opt/warden/procprotect.txt"),
            remote_url: PathBuf::from("/opt/warden/urlcfg.txt"),
            authorized_users: PathBuf::from("/etc/warden/users.txt"),
            logs_dir: PathBuf::from("/opt/warden/logs"),
        }
    );
}

#[test]
fn validation_rejects_out_of_range_values() {
    let cases = [
        ("[schedule]\nfast_tick_ms = 10", "fast_tick_ms"),
        ("[schedule]\nslow_tick_secs = 0", "slow_tick_secs"),
        ("[host]\ncall_timeout_secs = 0", "call_timeout_secs"),
        ("[host]\nmin_uid = 2000\nmax_uid = 1000", "min_uid"),
        ("[refresh]\nmax_body_bytes = 0", "max_body_bytes"),
        ("[paths]\nforbidden_list = \"\"", "forbidden_list"),
    ];
    for (toml_str, key) in cases {
        let result = parse(toml_str).validate();
        match result {
            Ok(()) => panic!("{key} should be rejected"),
            Err(err) => assert!(err.to_string().contains(key), "unexpected error: {err}"),
        }
    }
}

#[test]
fn load_config_reads_and_validates_file() {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("temp dir should be created: {err}"),
    };
    let good = dir.path().join("warden.toml");
    let bad = dir.path().join("bad.toml");
    std::fs::write(&good, "[escalation]\nprotected_failure_ticks = 40\n").expect("write good");
    std::fs::write(&bad, "[schedule]\nfast_tick_ms = 1\n").expect("write bad");

    let config = match load_config(&good) {
        Ok(config) => config,
        Err(err) => panic!("good config should load: {err}"),
    };
    assert_eq!(config.escalation.protected_failure_ticks, 40);
    assert!(load_config(&bad).is_err());
}

#[test]
fn malformed_toml_names_the_file() {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("temp dir should be created: {err}"),
    };
    let path = dir.path().join("warden.toml");
    std::fs::write(&path, "[schedule\nfast_tick_ms = ").expect("write config");

    match load_config(&path) {
        Ok(_) => panic!("malformed config should fail"),
        Err(err) => assert!(format!("{err:#}").contains("warden.toml")),
    }
}

#[test]
fn explicit_missing_config_is_an_error() {
    assert!(load_or_default(Some(Path::new("/nonexistent/warden.toml"))).is_err());
}
