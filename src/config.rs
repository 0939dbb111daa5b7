//! Configuration loading for the warden agent.
//!
//! Loads `warden.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal or empty config file is valid, and the
//! defaults reproduce the stock agent: 500 ms enforcement ticks, 11 s remote
//! refresh, reboot escalation after 80 / 120 ticks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Config file looked up next to the executable when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";

/// Top-level warden configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WardenConfig {
    /// Policy file locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Fast and slow trigger intervals.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Tick thresholds after which failures escalate to a reboot.
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Host capability settings.
    #[serde(default)]
    pub host: HostConfig,

    /// Remote forbidden-list refresh settings.
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Policy file locations. Relative names resolve against `base_dir`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the policy files. Defaults to the executable's directory.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Processes terminated on sight.
    #[serde(default = "default_forbidden_list")]
    pub forbidden_list: PathBuf,

    /// Processes that must stay alive and unsuspended.
    #[serde(default = "default_protected_list")]
    pub protected_list: PathBuf,

    /// Single URL whose body replaces the forbidden list.
    #[serde(default = "default_remote_url")]
    pub remote_url: PathBuf,

    /// Accounts exempt from removal.
    #[serde(default = "default_authorized_users")]
    pub authorized_users: PathBuf,

    /// Directory for rotated JSON logs.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            forbidden_list: default_forbidden_list(),
            protected_list: default_protected_list(),
            remote_url: default_remote_url(),
            authorized_users: default_authorized_users(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// Trigger intervals.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Milliseconds between enforcement ticks.
    #[serde(default = "default_fast_tick_ms")]
    pub fast_tick_ms: u64,

    /// Seconds between remote config refreshes.
    #[serde(default = "default_slow_tick_secs")]
    pub slow_tick_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fast_tick_ms: default_fast_tick_ms(),
            slow_tick_secs: default_slow_tick_secs(),
        }
    }
}

impl ScheduleConfig {
    /// Enforcement tick interval.
    pub fn fast_tick(&self) -> Duration {
        Duration::from_millis(self.fast_tick_ms)
    }

    /// Remote refresh interval.
    pub fn slow_tick(&self) -> Duration {
        Duration::from_secs(self.slow_tick_secs)
    }
}

/// Escalation thresholds, in ticks.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EscalationConfig {
    /// Ticks after which a protected-process failure reboots the host.
    #[serde(default = "default_protected_failure_ticks")]
    pub protected_failure_ticks: u64,

    /// Ticks after which a network failure reboots the host.
    #[serde(default = "default_network_failure_ticks")]
    pub network_failure_ticks: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            protected_failure_ticks: default_protected_failure_ticks(),
            network_failure_ticks: default_network_failure_ticks(),
        }
    }
}

/// Host capability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Time budget for each process, account or listing call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Lowest uid treated as a local user account.
    #[serde(default = "default_min_uid")]
    pub min_uid: u32,

    /// Highest uid treated as a local user account.
    #[serde(default = "default_max_uid")]
    pub max_uid: u32,

    /// Account database.
    #[serde(default = "default_passwd_path")]
    pub passwd_path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            min_uid: default_min_uid(),
            max_uid: default_max_uid(),
            passwd_path: default_passwd_path(),
        }
    }
}

impl HostConfig {
    /// Per-call time budget.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Remote refresh settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Whole-request HTTP timeout.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Largest response body accepted as a forbidden list.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Fully resolved policy file paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyPaths {
    /// Forbidden process list.
    pub forbidden_list: PathBuf,
    /// Protected process list.
    pub protected_list: PathBuf,
    /// Remote config URL file.
    pub remote_url: PathBuf,
    /// Authorized user list.
    pub authorized_users: PathBuf,
    /// Log directory.
    pub logs_dir: PathBuf,
}

impl PolicyPaths {
    /// Resolve every configured name against `base_dir`.
    pub fn resolve(paths: &PathsConfig, base_dir: &Path) -> Self {
        Self {
            forbidden_list: base_dir.join(&paths.forbidden_list),
            protected_list: base_dir.join(&paths.protected_list),
            remote_url: base_dir.join(&paths.remote_url),
            authorized_users: base_dir.join(&paths.authorized_users),
            logs_dir: base_dir.join(&paths.logs_dir),
        }
    }
}

impl WardenConfig {
    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.schedule.fast_tick_ms >= 50,
            "schedule.fast_tick_ms must be >= 50"
        );
        anyhow::ensure!(
            self.schedule.slow_tick_secs >= 1,
            "schedule.slow_tick_secs must be >= 1"
        );
        anyhow::ensure!(
            self.host.call_timeout_secs >= 1,
            "host.call_timeout_secs must be >= 1"
        );
        anyhow::ensure!(
            self.host.min_uid <= self.host.max_uid,
            "host.min_uid must not exceed host.max_uid"
        );
        anyhow::ensure!(
            self.refresh.http_timeout_secs >= 1,
            "refresh.http_timeout_secs must be >= 1"
        );
        anyhow::ensure!(
            self.refresh.max_body_bytes > 0,
            "refresh.max_body_bytes must be positive"
        );
        for (key, value) in [
            ("paths.forbidden_list", &self.paths.forbidden_list),
            ("paths.protected_list", &self.paths.protected_list),
            ("paths.remote_url", &self.paths.remote_url),
            ("paths.authorized_users", &self.paths.authorized_users),
        ] {
            anyhow::ensure!(!value.as_os_str().is_empty(), "{key} must not be empty");
        }
        Ok(())
    }

    /// Resolve policy paths, defaulting `base_dir` to the executable's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no base directory is configured and the executable
    /// path cannot be determined.
    pub fn policy_paths(&self) -> anyhow::Result<PolicyPaths> {
        let base_dir = match &self.paths.base_dir {
            Some(dir) => dir.clone(),
            None => executable_dir()?,
        };
        Ok(PolicyPaths::resolve(&self.paths, &base_dir))
    }
}

/// Load warden configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<WardenConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read warden config at {}", path.display()))?;
    let config: WardenConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse warden config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Load the explicit config, else `warden.toml` beside the executable, else defaults.
///
/// # Errors
///
/// Returns an error if an existing config file is invalid, or an explicit
/// path does not exist.
pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<WardenConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    let candidate = executable_dir()?.join(DEFAULT_CONFIG_FILE);
    if candidate.exists() {
        load_config(&candidate)
    } else {
        Ok(WardenConfig::default())
    }
}

/// Directory containing the running executable.
///
/// # Errors
///
/// Returns an error if the executable path cannot be determined.
pub fn executable_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to determine current executable path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("executable path {} has no parent", exe.display()))
}

// Default value functions for serde.

fn default_forbidden_list() -> PathBuf {
    PathBuf::from("proclist.txt")
}

fn default_protected_list() -> PathBuf {
    PathBuf::from("procprotect.txt")
}

fn default_remote_url() -> PathBuf {
    PathBuf::from("urlcfg.txt")
}

fn default_authorized_users() -> PathBuf {
    PathBuf::from("userlist.txt")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_fast_tick_ms() -> u64 {
    500
}

fn default_slow_tick_secs() -> u64 {
    11
}

fn default_protected_failure_ticks() -> u64 {
    80
}

fn default_network_failure_ticks() -> u64 {
    120
}

fn default_call_timeout_secs() -> u64 {
    5
}

fn default_min_uid() -> u32 {
    1000
}

fn default_max_uid() -> u32 {
    60000
}

fn default_passwd_path() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    1_048_576
}
