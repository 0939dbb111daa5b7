//! Suspended-process detection by probe-and-restore.
//!
//! A process counts as running only if at least one of its threads was
//! running at probe time. Each thread is probed by suspending it and reading
//! the suspend count from before the call, then resuming it straight away, so
//! the probe leaves every thread exactly as it found it.

use tracing::{debug, warn};

use crate::host::{Host, ProcessInfo};

/// Classify a process as suspended (`true`) or running (`false`).
///
/// Threads that cannot be opened are inconclusive and skipped. A process
/// with no threads, only inconclusive threads, or an unreadable thread list
/// is classified as suspended.
pub async fn is_suspended(host: &dyn Host, process: &ProcessInfo) -> bool {
    let threads = match host.threads(process.pid).await {
        Ok(threads) => threads,
        Err(e) => {
            debug!(pid = process.pid, error = %e, "thread list unavailable, treating as suspended");
            return true;
        }
    };

    for tid in threads {
        let previous = match host.suspend_thread(process.pid, tid).await {
            Ok(count) => count,
            Err(e) => {
                debug!(pid = process.pid, tid, error = %e, "thread probe inconclusive");
                continue;
            }
        };

        if let Err(e) = host.resume_thread(process.pid, tid).await {
            warn!(
                pid = process.pid,
                tid,
                error = %e,
                "failed to undo probe suspend"
            );
        }

        if previous == 0 {
            return false;
        }
    }

    true
}
