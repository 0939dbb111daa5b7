//! Cooperative scheduler for the enforcement and refresh triggers.
//!
//! A single task ticks two intervals. The fast interval runs one enforcement
//! tick inline; the slow interval dispatches a remote refresh as its own
//! task so a slow download never delays enforcement. The tick counter and
//! shutdown flag shared by both live in [`SchedulerContext`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::enforcement::{Enforcer, TickOutcome};
use crate::refresher::ConfigRefresher;

/// Tick counter and shutdown flag shared by both triggers.
///
/// The counter is written only by the enforcement trigger and the flag only
/// by the lifecycle hooks; everyone else reads.
#[derive(Debug, Default)]
pub struct SchedulerContext {
    ticks: AtomicU64,
    shutting_down: AtomicBool,
}

impl SchedulerContext {
    /// Fresh context: zero ticks, not shutting down.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one enforcement tick and return the new value.
    pub fn advance(&self) -> u64 {
        self.ticks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                Some(t.saturating_add(1))
            })
            .map_or(u64::MAX, |previous| previous.saturating_add(1))
    }

    /// Ticks counted so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Raise the shutdown flag. Returns `true` for the call that raised it.
    pub fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }

    /// Whether orderly shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

/// Trigger intervals for [`run_scheduler`].
#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    /// Enforcement tick interval.
    pub fast: Duration,
    /// Remote refresh interval.
    pub slow: Duration,
}

/// Run both triggers until the shutdown channel fires or closes.
///
/// An in-flight refresh is awaited before returning, never aborted.
pub async fn run_scheduler(
    enforcer: Arc<Enforcer>,
    refresher: Arc<ConfigRefresher>,
    intervals: Intervals,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        fast_ms = u64::try_from(intervals.fast.as_millis()).unwrap_or(u64::MAX),
        slow_secs = intervals.slow.as_secs(),
        "scheduler started"
    );

    let mut fast = tokio::time::interval(intervals.fast);
    fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut slow = tokio::time::interval(intervals.slow);
    slow.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Both intervals fire immediately; the first real ticks are one period out.
    fast.tick().await;
    slow.tick().await;

    let mut refresh_task: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("scheduler shutting down");
                    break;
                }
            }
            _ = fast.tick() => {
                if let TickOutcome::Escalated(reason) = enforcer.run_tick().await {
                    warn!(reason = %reason, "enforcement tick ended in escalation");
                }
            }
            _ = slow.tick() => {
                if refresh_task.as_ref().is_some_and(|task| !task.is_finished()) {
                    debug!("previous refresh still running, skipping this slow tick");
                    continue;
                }
                let refresher = Arc::clone(&refresher);
                refresh_task = Some(tokio::spawn(async move {
                    refresher.refresh_and_log().await;
                }));
            }
        }
    }

    if let Some(task) = refresh_task {
        if let Err(e) = task.await {
            warn!(error = %e, "refresh task failed during shutdown");
        }
    }

    info!("scheduler stopped");
}
