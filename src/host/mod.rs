//! Host capability abstraction.
//!
//! Every point where warden touches the operating system goes through the
//! [`Host`] trait: process and thread inspection, the thread suspend probe,
//! account management, network reachability, and the reboot path. The
//! enforcement loop is written purely against this trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub mod fake;
#[cfg(target_os = "linux")]
pub mod linux;

/// One process in a point-in-time snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    /// Process name as reported by the OS (no path).
    pub name: String,
    /// OS process id.
    pub pid: u32,
    /// Thread ids at snapshot time.
    pub threads: Vec<u32>,
}

impl ProcessInfo {
    /// Build a snapshot entry.
    pub fn new(name: impl Into<String>, pid: u32, threads: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            pid,
            threads,
        }
    }
}

/// Errors produced by host operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The process exited before the operation reached it.
    #[error("process {pid} no longer exists")]
    ProcessGone {
        /// Process id that was targeted.
        pid: u32,
    },
    /// A thread handle with suspend/resume/query rights could not be obtained.
    #[error("thread {tid} is not accessible: {reason}")]
    ThreadInaccessible {
        /// Thread id that was targeted.
        tid: u32,
        /// OS-level explanation.
        reason: String,
    },
    /// The agent lacks the rights for this operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The account does not exist (already removed).
    #[error("account '{name}' not found")]
    AccountNotFound {
        /// Account name that was targeted.
        name: String,
    },
    /// Account name contains characters that are never passed to the OS.
    #[error("refusing invalid account name '{0}'")]
    InvalidAccountName(String),
    /// A bounded host call exceeded its time budget.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Time budget in seconds.
        seconds: u64,
    },
    /// An external command ran but reported failure.
    #[error("host command failed: {0}")]
    Command(String),
    /// Filesystem or OS I/O failure.
    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow interface over every OS capability the agent consumes.
///
/// `suspend_thread` and `resume_thread` form the two halves of the suspend
/// probe: every successful `suspend_thread` must be paired with a
/// `resume_thread` on the same thread so the probe leaves no trace.
#[async_trait]
pub trait Host: Send + Sync {
    /// Enumerate running processes with their thread ids.
    async fn processes(&self) -> Result<Vec<ProcessInfo>, HostError>;

    /// Enumerate the live thread ids of one process.
    async fn threads(&self, pid: u32) -> Result<Vec<u32>, HostError>;

    /// Suspend a thread and return its suspend count from before the call.
    ///
    /// Zero means the thread was running.
    async fn suspend_thread(&self, pid: u32, tid: u32) -> Result<u32, HostError>;

    /// Undo one `suspend_thread` on the same thread.
    async fn resume_thread(&self, pid: u32, tid: u32) -> Result<(), HostError>;

    /// Forcibly terminate a process.
    async fn terminate_process(&self, pid: u32) -> Result<(), HostError>;

    /// Whether the host currently reports network connectivity.
    async fn is_network_connected(&self) -> bool;

    /// Enumerate local user accounts subject to the account policy.
    async fn local_accounts(&self) -> Result<Vec<String>, HostError>;

    /// Delete a local account by name.
    async fn delete_account(&self, name: &str) -> Result<(), HostError>;

    /// Acquire the shutdown privilege for the current principal. Idempotent.
    async fn acquire_shutdown_privilege(&self) -> Result<(), HostError>;

    /// Issue an unconditional forced reboot.
    async fn force_reboot(&self) -> Result<(), HostError>;
}

/// Run a host call under a time budget, mapping expiry to [`HostError::Timeout`].
///
/// # Errors
///
/// Returns the call's own error, or `Timeout` if the budget is exceeded.
pub async fn bounded<T, F>(
    operation: &'static str,
    budget: Duration,
    call: F,
) -> Result<T, HostError>
where
    F: std::future::Future<Output = Result<T, HostError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(HostError::Timeout {
            operation,
            seconds: budget.as_secs(),
        }),
    }
}
