//! Privilege and power control: the reboot escalation path.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, warn};

use crate::host::Host;
use crate::scheduler::SchedulerContext;

/// Why the loop escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// A protected process was missing or suspended past the grace period.
    ProtectedProcess {
        /// Protected list entry that was not satisfied.
        entry: String,
        /// What was wrong with it.
        failure: ProtectedFailure,
    },
    /// The host reported no network past the grace period.
    NetworkUnreachable,
}

/// How a protected entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedFailure {
    /// No process with that name is running.
    Missing,
    /// The process exists but all of its threads are suspended.
    Suspended,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtectedProcess {
                entry,
                failure: ProtectedFailure::Missing,
            } => write!(f, "protected process '{entry}' is not running"),
            Self::ProtectedProcess {
                entry,
                failure: ProtectedFailure::Suspended,
            } => write!(f, "protected process '{entry}' is suspended"),
            Self::NetworkUnreachable => f.write_str("network is unreachable"),
        }
    }
}

/// Result of an escalation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// Shutdown had begun; nothing was done.
    Suppressed,
    /// The reboot request was accepted by the host.
    Issued,
    /// The reboot request itself failed.
    Failed(String),
}

/// Acquires the shutdown privilege and forces a reboot.
pub struct PowerController {
    host: Arc<dyn Host>,
    context: Arc<SchedulerContext>,
}

impl PowerController {
    /// Controller acting on `host`, honouring `context`'s shutdown flag.
    pub fn new(host: Arc<dyn Host>, context: Arc<SchedulerContext>) -> Self {
        Self { host, context }
    }

    /// Force a reboot unless shutdown has begun.
    ///
    /// A failure to acquire the privilege is logged and the reboot is
    /// attempted anyway. Callers must treat this as the end of the tick.
    pub async fn escalate_to_reboot(&self, reason: &EscalationReason) -> Escalation {
        if self.context.is_shutting_down() {
            warn!(reason = %reason, "escalation suppressed, agent is shutting down");
            return Escalation::Suppressed;
        }

        error!(
            reason = %reason,
            tick = self.context.ticks(),
            "enforcement invariant lost, forcing reboot"
        );

        if let Err(e) = self.host.acquire_shutdown_privilege().await {
            error!(error = %e, "failed to acquire shutdown privilege, attempting reboot anyway");
        }

        match self.host.force_reboot().await {
            Ok(()) => Escalation::Issued,
            Err(e) => {
                error!(error = %e, "forced reboot request failed");
                Escalation::Failed(e.to_string())
            }
        }
    }
}
