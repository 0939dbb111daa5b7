//! Linux implementation of [`Host`] over procfs, sysfs, signals and `userdel`.
//!
//! Linux has no per-thread suspend count, so the suspend probe is realised
//! with job control: a thread already in the stopped state reports a previous
//! count of one, otherwise the probe stops the thread group with `SIGSTOP`
//! and reports zero. Stops issued by the probe are remembered so that
//! `resume_thread` continues only what the probe itself stopped.
//!
//! The state read and the `SIGSTOP` are not atomic. If another party stops
//! the process between the two, the probe still counts the stop as its own
//! and its `SIGCONT` resumes that external stop. The window is the length of
//! one `stat` read.
//!
//! Exited threads (state `Z` or `X`) are never reported: they are dropped from
//! thread lists, a process with no live thread is left out of the snapshot,
//! and a probe that finds one reports the thread as inaccessible.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info};

use super::{Host, HostError, ProcessInfo};
use crate::config::HostConfig;

/// Kernel limit on `comm` length (TASK_COMM_LEN minus the terminator).
const COMM_MAX_LEN: usize = 15;

/// `userdel` exit status for an unknown user.
const USERDEL_NO_SUCH_USER: i32 = 6;

/// The real host.
#[derive(Debug)]
pub struct LinuxHost {
    proc_root: PathBuf,
    sys_root: PathBuf,
    passwd_path: PathBuf,
    min_uid: u32,
    max_uid: u32,
    stopped_by_probe: Mutex<HashSet<u32>>,
}

impl LinuxHost {
    /// Host reading the live `/proc` and `/sys`.
    pub fn new(config: &HostConfig) -> Self {
        Self::with_roots(config, PathBuf::from("/proc"), PathBuf::from("/sys"))
    }

    /// Host reading procfs and sysfs from alternative roots.
    pub fn with_roots(config: &HostConfig, proc_root: PathBuf, sys_root: PathBuf) -> Self {
        Self {
            proc_root,
            sys_root,
            passwd_path: config.passwd_path.clone(),
            min_uid: config.min_uid,
            max_uid: config.max_uid,
            stopped_by_probe: Mutex::new(HashSet::new()),
        }
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), Errno> {
        let raw = i32::try_from(pid).map_err(|_| Errno::ESRCH)?;
        kill(Pid::from_raw(raw), signal)
    }
}

#[async_trait]
impl Host for LinuxHost {
    async fn processes(&self) -> Result<Vec<ProcessInfo>, HostError> {
        let proc_root = self.proc_root.clone();
        tokio::task::spawn_blocking(move || list_processes(&proc_root))
            .await
            .map_err(|e| HostError::Command(format!("process enumeration task failed: {e}")))?
    }

    async fn threads(&self, pid: u32) -> Result<Vec<u32>, HostError> {
        let dir = self.proc_root.join(pid.to_string());
        tokio::task::spawn_blocking(move || list_threads(&dir, pid))
            .await
            .map_err(|e| HostError::Command(format!("thread enumeration task failed: {e}")))?
    }

    async fn suspend_thread(&self, pid: u32, tid: u32) -> Result<u32, HostError> {
        // The agent is running by definition; stopping it would freeze the loop.
        if pid == std::process::id() {
            return Ok(0);
        }

        let stat_path = self
            .proc_root
            .join(pid.to_string())
            .join("task")
            .join(tid.to_string())
            .join("stat");
        let stat = tokio::fs::read_to_string(&stat_path)
            .await
            .map_err(|e| HostError::ThreadInaccessible {
                tid,
                reason: e.to_string(),
            })?;
        let state = parse_stat_state(&stat).ok_or_else(|| HostError::ThreadInaccessible {
            tid,
            reason: "unparsable stat line".to_owned(),
        })?;

        if is_dead_state(state) {
            return Err(HostError::ThreadInaccessible {
                tid,
                reason: "thread has exited".to_owned(),
            });
        }
        if is_stopped_state(state) {
            return Ok(1);
        }

        self.signal(pid, Signal::SIGSTOP)
            .map_err(|errno| HostError::ThreadInaccessible {
                tid,
                reason: errno.desc().to_owned(),
            })?;
        self.stopped_by_probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
        Ok(0)
    }

    async fn resume_thread(&self, pid: u32, tid: u32) -> Result<(), HostError> {
        let issued = self
            .stopped_by_probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pid);
        if !issued {
            return Ok(());
        }
        self.signal(pid, Signal::SIGCONT)
            .map_err(|errno| HostError::ThreadInaccessible {
                tid,
                reason: errno.desc().to_owned(),
            })
    }

    async fn terminate_process(&self, pid: u32) -> Result<(), HostError> {
        match self.signal(pid, Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(HostError::ProcessGone { pid }),
            Err(Errno::EPERM) => Err(HostError::PermissionDenied(format!(
                "not allowed to signal process {pid}"
            ))),
            Err(errno) => Err(HostError::Command(format!(
                "kill({pid}, SIGKILL) failed: {}",
                errno.desc()
            ))),
        }
    }

    async fn is_network_connected(&self) -> bool {
        let route_table = match tokio::fs::read_to_string(self.proc_root.join("net/route")).await
        {
            Ok(table) => table,
            Err(e) => {
                debug!(error = %e, "cannot read routing table");
                return false;
            }
        };

        for iface in default_route_interfaces(&route_table) {
            let operstate_path = self.sys_root.join("class/net").join(&iface).join("operstate");
            let operstate = tokio::fs::read_to_string(&operstate_path)
                .await
                .unwrap_or_default();
            if operstate.trim() != "down" {
                return true;
            }
        }
        false
    }

    async fn local_accounts(&self) -> Result<Vec<String>, HostError> {
        let contents = tokio::fs::read_to_string(&self.passwd_path).await?;
        Ok(parse_passwd(&contents, self.min_uid, self.max_uid))
    }

    async fn delete_account(&self, name: &str) -> Result<(), HostError> {
        if !is_valid_account_name(name) {
            return Err(HostError::InvalidAccountName(name.to_owned()));
        }

        let output = tokio::process::Command::new("userdel")
            .arg(name)
            .kill_on_drop(true)
            .output()
            .await?;

        match output.status.code() {
            Some(0) => Ok(()),
            Some(USERDEL_NO_SUCH_USER) => Err(HostError::AccountNotFound {
                name: name.to_owned(),
            }),
            _ => Err(HostError::Command(format!(
                "userdel {name} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn acquire_shutdown_privilege(&self) -> Result<(), HostError> {
        if nix::unistd::geteuid().is_root() {
            Ok(())
        } else {
            Err(HostError::PermissionDenied(
                "CAP_SYS_BOOT requires running as root".to_owned(),
            ))
        }
    }

    async fn force_reboot(&self) -> Result<(), HostError> {
        info!("flushing filesystems before forced reboot");
        nix::unistd::sync();
        match nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT) {
            Ok(never) => match never {},
            Err(errno) => Err(HostError::Command(format!(
                "reboot(2) failed: {}",
                errno.desc()
            ))),
        }
    }
}

/// Enumerate `/proc/<pid>` entries. Processes that vanish mid-read are skipped.
fn list_processes(proc_root: &Path) -> Result<Vec<ProcessInfo>, HostError> {
    let mut processes = Vec::new();
    for entry in fs::read_dir(proc_root)?.filter_map(|e| e.ok()) {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let dir = entry.path();
        let Some(name) = read_process_name(&dir) else {
            continue;
        };
        let threads = list_threads(&dir, pid).unwrap_or_default();
        // Zombies and processes that exited mid-read have no live threads.
        if threads.is_empty() {
            continue;
        }
        processes.push(ProcessInfo::new(name, pid, threads));
    }
    Ok(processes)
}

fn list_threads(proc_dir: &Path, pid: u32) -> Result<Vec<u32>, HostError> {
    let entries = fs::read_dir(proc_dir.join("task")).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HostError::ProcessGone { pid },
        _ => HostError::Io(e),
    })?;
    let mut threads: Vec<u32> = entries
        .filter_map(|e| e.ok())
        .filter(|e| thread_is_live(&e.path()))
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
        .collect();
    threads.sort_unstable();
    Ok(threads)
}

/// A thread whose `stat` is readable and not in an exited state.
fn thread_is_live(task_dir: &Path) -> bool {
    fs::read_to_string(task_dir.join("stat"))
        .ok()
        .and_then(|stat| parse_stat_state(&stat))
        .is_some_and(|state| !is_dead_state(state))
}

/// Read the process name, recovering names the kernel truncated in `comm`.
fn read_process_name(proc_dir: &Path) -> Option<String> {
    let comm = fs::read_to_string(proc_dir.join("comm")).ok()?;
    let comm = comm.trim_end_matches('\n');
    if comm.len() < COMM_MAX_LEN {
        return Some(comm.to_owned());
    }

    let cmdline = fs::read(proc_dir.join("cmdline")).unwrap_or_default();
    let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
    let argv0 = String::from_utf8_lossy(argv0);
    let base = Path::new(argv0.as_ref())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if base.starts_with(comm) {
        Some(base.to_owned())
    } else {
        Some(comm.to_owned())
    }
}

/// Extract the scheduler state letter from a `stat` line.
///
/// The command name may itself contain spaces and parentheses, so the state
/// is taken after the last `)`.
pub fn parse_stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// `T` is a job-control stop, `t` a tracing stop.
pub fn is_stopped_state(state: char) -> bool {
    matches!(state, 'T' | 't')
}

/// `Z` is a zombie, `X` a task being torn down.
pub fn is_dead_state(state: char) -> bool {
    matches!(state, 'Z' | 'X')
}

/// Interfaces carrying a default route in a `/proc/net/route` table, loopback excluded.
pub fn default_route_interfaces(route_table: &str) -> Vec<String> {
    route_table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let iface = columns.next()?;
            let destination = columns.next()?;
            (destination == "00000000" && iface != "lo").then(|| iface.to_owned())
        })
        .collect()
}

/// Account names from `/etc/passwd` with a uid inside `min_uid..=max_uid`.
pub fn parse_passwd(contents: &str, min_uid: u32, max_uid: u32) -> Vec<String> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            let name = fields.first()?;
            let uid: u32 = fields.get(2)?.parse().ok()?;
            (!name.is_empty() && (min_uid..=max_uid).contains(&uid)).then(|| (*name).to_owned())
        })
        .collect()
}

/// Names safe to pass to `userdel` as a positional argument.
pub fn is_valid_account_name(name: &str) -> bool {
    let body = name.strip_suffix('$').unwrap_or(name);
    !body.is_empty()
        && !body.starts_with('-')
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
