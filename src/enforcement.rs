//! The enforcement loop.
//!
//! One call to [`Enforcer::run_tick`] is one fast tick:
//!
//! 1. count the tick; bail out if shutdown has begun
//! 2. reload the policy lists and snapshot the live processes
//! 3. protected processes must be running and not suspended, otherwise
//!    reboot once the tick count passes `protected_failure_ticks`
//! 4. the network must be up, otherwise reboot once the tick count passes
//!    `network_failure_ticks`
//! 5. terminate every forbidden process
//! 6. delete every account not on the authorized list
//!
//! The tick counter never resets, so once a threshold is passed a recurring
//! failure escalates on the tick it is seen. Per-item failures in steps 5
//! and 6 are logged and counted; nothing but an escalation ends a tick early.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EscalationConfig;
use crate::host::{bounded, Host, HostError, ProcessInfo};
use crate::policy::{matches_protected, PolicyList, PolicyStore};
use crate::power::{Escalation, EscalationReason, PowerController, ProtectedFailure};
use crate::scheduler::SchedulerContext;
use crate::suspend::is_suspended;

/// How a tick ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Shutdown was observed; no corrective action was taken past that point.
    ShuttingDown,
    /// A reboot was requested and the rest of the tick was skipped.
    Escalated(EscalationReason),
    /// All steps ran.
    Enforced(EnforcementReport),
}

/// Counters from one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnforcementReport {
    /// Tick number.
    pub tick: u64,
    /// Forbidden processes terminated.
    pub processes_terminated: usize,
    /// Forbidden processes that had already exited.
    pub processes_already_gone: usize,
    /// Forbidden processes that could not be terminated.
    pub termination_failures: usize,
    /// Unauthorized accounts deleted.
    pub accounts_removed: usize,
    /// Unauthorized accounts that could not be deleted.
    pub account_failures: usize,
    /// Whether the process snapshot was unavailable this tick.
    pub process_list_unavailable: bool,
}

/// Status of one protected entry in an [`Assessment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedStatus {
    /// Protected list entry.
    pub entry: String,
    /// `None` when satisfied.
    pub failure: Option<ProtectedFailure>,
}

/// Read-only view of what a tick would act on.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    /// Protected entries and their state, in list order.
    pub protected: Vec<ProtectedStatus>,
    /// Host network reachability.
    pub network_connected: bool,
    /// Running processes on the forbidden list.
    pub forbidden_running: Vec<ProcessInfo>,
    /// Accounts not on the authorized list.
    pub unauthorized_accounts: Vec<String>,
    /// Errors that prevented part of the assessment.
    pub errors: Vec<String>,
}

/// Policy decision engine over a [`Host`].
pub struct Enforcer {
    host: Arc<dyn Host>,
    policy: Arc<PolicyStore>,
    context: Arc<SchedulerContext>,
    power: PowerController,
    thresholds: EscalationConfig,
    call_timeout: Duration,
    own_pid: u32,
}

impl Enforcer {
    /// Build an enforcer sharing `context` with the rest of the agent.
    pub fn new(
        host: Arc<dyn Host>,
        policy: Arc<PolicyStore>,
        context: Arc<SchedulerContext>,
        thresholds: EscalationConfig,
        call_timeout: Duration,
    ) -> Self {
        let power = PowerController::new(Arc::clone(&host), Arc::clone(&context));
        Self {
            host,
            policy,
            context,
            power,
            thresholds,
            call_timeout,
            own_pid: std::process::id(),
        }
    }

    /// Run one enforcement tick.
    pub async fn run_tick(&self) -> TickOutcome {
        let tick = self.context.advance();
        if self.context.is_shutting_down() {
            return TickOutcome::ShuttingDown;
        }

        let policy = self.policy.reload().await;
        let mut report = EnforcementReport {
            tick,
            ..EnforcementReport::default()
        };

        let processes = match bounded(
            "process enumeration",
            self.call_timeout,
            self.host.processes(),
        )
        .await
        {
            Ok(processes) => Some(processes),
            Err(e) => {
                warn!(tick, error = %e, "process snapshot unavailable, skipping process checks");
                report.process_list_unavailable = true;
                None
            }
        };

        if let Some(processes) = &processes {
            if let Some(reason) = self.first_protected_failure(&policy.protected, processes).await
            {
                if tick > self.thresholds.protected_failure_ticks {
                    return self.escalate(reason).await;
                }
                debug!(tick, reason = %reason, "protected process failure within grace period");
            }
        }

        if !self.network_connected().await {
            if tick > self.thresholds.network_failure_ticks {
                return self.escalate(EscalationReason::NetworkUnreachable).await;
            }
            debug!(tick, "network unreachable within grace period");
        }

        if self.context.is_shutting_down() {
            return TickOutcome::ShuttingDown;
        }
        if let Some(processes) = &processes {
            self.terminate_forbidden(&policy.forbidden, processes, &mut report)
                .await;
        }

        if self.context.is_shutting_down() {
            return TickOutcome::ShuttingDown;
        }
        self.remove_unauthorized(&policy.authorized_users, &mut report)
            .await;

        TickOutcome::Enforced(report)
    }

    /// Evaluate every policy without taking corrective action.
    ///
    /// Suspend probes still run; they restore what they touch.
    pub async fn assess(&self) -> Assessment {
        let policy = self.policy.reload().await;
        let mut errors = Vec::new();

        let processes = match bounded(
            "process enumeration",
            self.call_timeout,
            self.host.processes(),
        )
        .await
        {
            Ok(processes) => processes,
            Err(e) => {
                errors.push(format!("process enumeration: {e}"));
                Vec::new()
            }
        };

        let mut protected = Vec::with_capacity(policy.protected.len());
        for entry in policy.protected.entries() {
            protected.push(ProtectedStatus {
                entry: entry.clone(),
                failure: self.protected_failure(entry, &processes).await,
            });
        }

        let forbidden_running = processes
            .iter()
            .filter(|p| policy.forbidden.contains(&p.name))
            .cloned()
            .collect();

        let unauthorized_accounts = match bounded(
            "account enumeration",
            self.call_timeout,
            self.host.local_accounts(),
        )
        .await
        {
            Ok(accounts) => accounts
                .into_iter()
                .filter(|a| !policy.authorized_users.contains(a))
                .collect(),
            Err(e) => {
                errors.push(format!("account enumeration: {e}"));
                Vec::new()
            }
        };

        Assessment {
            protected,
            network_connected: self.network_connected().await,
            forbidden_running,
            unauthorized_accounts,
            errors,
        }
    }

    async fn escalate(&self, reason: EscalationReason) -> TickOutcome {
        match self.power.escalate_to_reboot(&reason).await {
            Escalation::Suppressed => TickOutcome::ShuttingDown,
            Escalation::Issued | Escalation::Failed(_) => TickOutcome::Escalated(reason),
        }
    }

    /// First unsatisfied protected entry, in list order.
    async fn first_protected_failure(
        &self,
        protected: &PolicyList,
        processes: &[ProcessInfo],
    ) -> Option<EscalationReason> {
        for entry in protected.entries() {
            if let Some(failure) = self.protected_failure(entry, processes).await {
                return Some(EscalationReason::ProtectedProcess {
                    entry: entry.clone(),
                    failure,
                });
            }
        }
        None
    }

    /// Satisfied when any process matching `entry` is running unsuspended.
    async fn protected_failure(
        &self,
        entry: &str,
        processes: &[ProcessInfo],
    ) -> Option<ProtectedFailure> {
        let mut found = false;
        for process in processes.iter().filter(|p| matches_protected(entry, &p.name)) {
            found = true;
            if !is_suspended(self.host.as_ref(), process).await {
                return None;
            }
        }
        if found {
            Some(ProtectedFailure::Suspended)
        } else {
            Some(ProtectedFailure::Missing)
        }
    }

    /// A probe that does not answer within the call budget is not evidence of an outage.
    async fn network_connected(&self) -> bool {
        match tokio::time::timeout(self.call_timeout, self.host.is_network_connected()).await {
            Ok(connected) => connected,
            Err(_) => {
                warn!("network probe timed out, treating as connected");
                true
            }
        }
    }

    async fn terminate_forbidden(
        &self,
        forbidden: &PolicyList,
        processes: &[ProcessInfo],
        report: &mut EnforcementReport,
    ) {
        for process in processes
            .iter()
            .filter(|p| p.pid != self.own_pid && forbidden.contains(&p.name))
        {
            let result = bounded(
                "process termination",
                self.call_timeout,
                self.host.terminate_process(process.pid),
            )
            .await;
            match result {
                Ok(()) => {
                    warn!(pid = process.pid, name = %process.name, "terminated forbidden process");
                    bump(&mut report.processes_terminated);
                }
                Err(HostError::ProcessGone { .. }) => {
                    debug!(pid = process.pid, name = %process.name, "forbidden process already exited");
                    bump(&mut report.processes_already_gone);
                }
                Err(e) => {
                    warn!(
                        pid = process.pid,
                        name = %process.name,
                        error = %e,
                        "failed to terminate forbidden process"
                    );
                    bump(&mut report.termination_failures);
                }
            }
        }
    }

    async fn remove_unauthorized(&self, authorized: &PolicyList, report: &mut EnforcementReport) {
        let accounts = match bounded(
            "account enumeration",
            self.call_timeout,
            self.host.local_accounts(),
        )
        .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "failed to enumerate local accounts");
                return;
            }
        };

        for account in accounts.iter().filter(|a| !authorized.contains(a)) {
            let result = bounded(
                "account deletion",
                self.call_timeout,
                self.host.delete_account(account),
            )
            .await;
            match result {
                Ok(()) => {
                    warn!(account = %account, "removed unauthorized account");
                    bump(&mut report.accounts_removed);
                }
                Err(HostError::AccountNotFound { .. }) => {
                    debug!(account = %account, "unauthorized account already removed");
                }
                Err(e) => {
                    warn!(account = %account, error = %e, "failed to remove unauthorized account");
                    bump(&mut report.account_failures);
                }
            }
        }

        if report.accounts_removed > 0 {
            info!(
                removed = report.accounts_removed,
                failed = report.account_failures,
                "account policy enforced"
            );
        }
    }
}

fn bump(counter: &mut usize) {
    *counter = counter.saturating_add(1);
}
