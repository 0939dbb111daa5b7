//! Deterministic in-memory [`Host`] for tests and dry runs.
//!
//! Models Windows-style per-thread suspend counts, processes that exit
//! between snapshot and action, termination failures, accounts, network
//! state and reboot requests. Every corrective call is recorded so tests can
//! assert on exactly what the enforcement loop asked for.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Host, HostError, ProcessInfo};
use crate::scheduler::SchedulerContext;

#[derive(Debug, Default)]
struct ThreadState {
    suspend_count: u32,
    inaccessible: bool,
}

#[derive(Debug)]
struct FakeState {
    processes: Vec<ProcessInfo>,
    threads: HashMap<u32, ThreadState>,
    network_connected: bool,
    accounts: Vec<String>,
    failing_kills: HashSet<u32>,
    exited_before_kill: HashSet<u32>,
    failing_deletes: HashSet<String>,
    list_processes_fails: bool,
    privilege_fails: bool,
    reboot_fails: bool,
    shutdown_on_listing: Option<Arc<SchedulerContext>>,
    terminate_requests: Vec<u32>,
    delete_requests: Vec<String>,
    privilege_requests: usize,
    reboot_requests: usize,
    suspend_requests: usize,
}

/// Scriptable fake host.
#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    /// An empty host: no processes, no accounts, network connected.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                processes: Vec::new(),
                threads: HashMap::new(),
                network_connected: true,
                accounts: Vec::new(),
                failing_kills: HashSet::new(),
                exited_before_kill: HashSet::new(),
                failing_deletes: HashSet::new(),
                list_processes_fails: false,
                privilege_fails: false,
                reboot_fails: false,
                shutdown_on_listing: None,
                terminate_requests: Vec::new(),
                delete_requests: Vec::new(),
                privilege_requests: 0,
                reboot_requests: 0,
                suspend_requests: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a running process whose threads are all running.
    pub fn add_process(&self, name: &str, pid: u32, threads: &[u32]) {
        let mut state = self.lock();
        for tid in threads {
            state.threads.entry(*tid).or_default();
        }
        state
            .processes
            .push(ProcessInfo::new(name, pid, threads.to_vec()));
    }

    /// Suspend a thread from outside the agent (as a debugger or attacker would).
    pub fn suspend_externally(&self, tid: u32) {
        let mut state = self.lock();
        let thread = state.threads.entry(tid).or_default();
        thread.suspend_count = thread.suspend_count.saturating_add(1);
    }

    /// Make a thread refuse suspend/resume handles.
    pub fn make_inaccessible(&self, tid: u32) {
        self.lock().threads.entry(tid).or_default().inaccessible = true;
    }

    /// Current suspend count of a thread.
    pub fn suspend_count(&self, tid: u32) -> u32 {
        self.lock()
            .threads
            .get(&tid)
            .map_or(0, |thread| thread.suspend_count)
    }

    /// Set the network reachability answer.
    pub fn set_network_connected(&self, connected: bool) {
        self.lock().network_connected = connected;
    }

    /// Replace the local account list.
    pub fn set_accounts(&self, accounts: &[&str]) {
        self.lock().accounts = accounts.iter().map(|a| (*a).to_owned()).collect();
    }

    /// Termination of this pid fails with a permission error.
    pub fn fail_termination(&self, pid: u32) {
        self.lock().failing_kills.insert(pid);
    }

    /// This pid exits on its own just before the agent's termination request lands.
    pub fn exit_before_termination(&self, pid: u32) {
        self.lock().exited_before_kill.insert(pid);
    }

    /// Deletion of this account fails with a permission error.
    pub fn fail_deletion(&self, name: &str) {
        self.lock().failing_deletes.insert(name.to_owned());
    }

    /// Make process enumeration fail.
    pub fn fail_process_listing(&self) {
        self.lock().list_processes_fails = true;
    }

    /// Make shutdown privilege acquisition fail.
    pub fn fail_privilege(&self) {
        self.lock().privilege_fails = true;
    }

    /// Make the reboot request fail.
    pub fn fail_reboot(&self) {
        self.lock().reboot_fails = true;
    }

    /// Raise `context`'s shutdown flag from inside the next process listing,
    /// as a service stop landing mid-tick would.
    pub fn begin_shutdown_during_listing(&self, context: Arc<SchedulerContext>) {
        self.lock().shutdown_on_listing = Some(context);
    }

    /// Pids the agent asked to terminate, in request order.
    pub fn terminate_requests(&self) -> Vec<u32> {
        self.lock().terminate_requests.clone()
    }

    /// Accounts the agent asked to delete, in request order.
    pub fn delete_requests(&self) -> Vec<String> {
        self.lock().delete_requests.clone()
    }

    /// Accounts still present.
    pub fn accounts(&self) -> Vec<String> {
        self.lock().accounts.clone()
    }

    /// Pids still running.
    pub fn running_pids(&self) -> Vec<u32> {
        self.lock().processes.iter().map(|p| p.pid).collect()
    }

    /// Number of shutdown privilege requests.
    pub fn privilege_requests(&self) -> usize {
        self.lock().privilege_requests
    }

    /// Number of reboot requests.
    pub fn reboot_requests(&self) -> usize {
        self.lock().reboot_requests
    }

    /// Number of suspend probes issued.
    pub fn suspend_requests(&self) -> usize {
        self.lock().suspend_requests
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn processes(&self) -> Result<Vec<ProcessInfo>, HostError> {
        let mut state = self.lock();
        if let Some(context) = state.shutdown_on_listing.take() {
            context.begin_shutdown();
        }
        if state.list_processes_fails {
            return Err(HostError::PermissionDenied(
                "process enumeration refused".to_owned(),
            ));
        }
        Ok(state.processes.clone())
    }

    async fn threads(&self, pid: u32) -> Result<Vec<u32>, HostError> {
        self.lock()
            .processes
            .iter()
            .find(|p| p.pid == pid)
            .map(|p| p.threads.clone())
            .ok_or(HostError::ProcessGone { pid })
    }

    async fn suspend_thread(&self, _pid: u32, tid: u32) -> Result<u32, HostError> {
        let mut state = self.lock();
        state.suspend_requests = state.suspend_requests.saturating_add(1);
        let Some(thread) = state.threads.get_mut(&tid) else {
            return Err(HostError::ThreadInaccessible {
                tid,
                reason: "no such thread".to_owned(),
            });
        };
        if thread.inaccessible {
            return Err(HostError::ThreadInaccessible {
                tid,
                reason: "access denied".to_owned(),
            });
        }
        let previous = thread.suspend_count;
        thread.suspend_count = previous.saturating_add(1);
        Ok(previous)
    }

    async fn resume_thread(&self, _pid: u32, tid: u32) -> Result<(), HostError> {
        let mut state = self.lock();
        let Some(thread) = state.threads.get_mut(&tid) else {
            return Err(HostError::ThreadInaccessible {
                tid,
                reason: "no such thread".to_owned(),
            });
        };
        thread.suspend_count = thread.suspend_count.saturating_sub(1);
        Ok(())
    }

    async fn terminate_process(&self, pid: u32) -> Result<(), HostError> {
        let mut state = self.lock();
        state.terminate_requests.push(pid);
        if state.exited_before_kill.contains(&pid) {
            state.processes.retain(|p| p.pid != pid);
        }
        if state.failing_kills.contains(&pid) {
            return Err(HostError::PermissionDenied(format!(
                "cannot terminate {pid}"
            )));
        }
        let before = state.processes.len();
        state.processes.retain(|p| p.pid != pid);
        if state.processes.len() == before {
            return Err(HostError::ProcessGone { pid });
        }
        Ok(())
    }

    async fn is_network_connected(&self) -> bool {
        self.lock().network_connected
    }

    async fn local_accounts(&self) -> Result<Vec<String>, HostError> {
        Ok(self.lock().accounts.clone())
    }

    async fn delete_account(&self, name: &str) -> Result<(), HostError> {
        let mut state = self.lock();
        state.delete_requests.push(name.to_owned());
        if state.failing_deletes.contains(name) {
            return Err(HostError::PermissionDenied(format!(
                "cannot delete account {name}"
            )));
        }
        let before = state.accounts.len();
        state.accounts.retain(|a| a != name);
        if state.accounts.len() == before {
            return Err(HostError::AccountNotFound {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    async fn acquire_shutdown_privilege(&self) -> Result<(), HostError> {
        let mut state = self.lock();
        state.privilege_requests = state.privilege_requests.saturating_add(1);
        if state.privilege_fails {
            return Err(HostError::PermissionDenied(
                "shutdown privilege not held".to_owned(),
            ));
        }
        Ok(())
    }

    async fn force_reboot(&self) -> Result<(), HostError> {
        let mut state = self.lock();
        state.reboot_requests = state.reboot_requests.saturating_add(1);
        if state.reboot_fails {
            return Err(HostError::Command("reboot refused".to_owned()));
        }
        Ok(())
    }
}
