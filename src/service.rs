//! Service lifecycle: start, stop and system-shutdown hooks.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{PolicyPaths, WardenConfig};
use crate::enforcement::Enforcer;
use crate::host::Host;
use crate::policy::PolicyStore;
use crate::refresher::ConfigRefresher;
use crate::scheduler::{run_scheduler, Intervals, SchedulerContext};

/// Every component of the agent, wired to one host and one scheduler context.
pub struct Assembly {
    /// Shared tick counter and shutdown flag.
    pub context: Arc<SchedulerContext>,
    /// Enforcement loop.
    pub enforcer: Arc<Enforcer>,
    /// Remote forbidden-list refresher.
    pub refresher: Arc<ConfigRefresher>,
    /// Trigger intervals.
    pub intervals: Intervals,
}

impl Assembly {
    /// Wire the agent from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client for the refresher cannot be built.
    pub fn new(
        config: &WardenConfig,
        paths: PolicyPaths,
        host: Arc<dyn Host>,
    ) -> anyhow::Result<Self> {
        let context = Arc::new(SchedulerContext::new());
        let refresher = Arc::new(ConfigRefresher::new(
            paths.remote_url.clone(),
            paths.forbidden_list.clone(),
            &config.refresh,
        )?);
        let policy = Arc::new(PolicyStore::new(paths));
        let enforcer = Arc::new(Enforcer::new(
            host,
            policy,
            Arc::clone(&context),
            config.escalation,
            config.host.call_timeout(),
        ));
        Ok(Self {
            context,
            enforcer,
            refresher,
            intervals: Intervals {
                fast: config.schedule.fast_tick(),
                slow: config.schedule.slow_tick(),
            },
        })
    }

    /// Start the service from this assembly.
    pub fn start(self) -> WardenService {
        WardenService::on_start(self.enforcer, self.refresher, self.context, self.intervals)
    }
}

/// A running agent: the scheduler task plus the handles needed to stop it.
pub struct WardenService {
    context: Arc<SchedulerContext>,
    shutdown_tx: watch::Sender<bool>,
    scheduler: Option<JoinHandle<()>>,
}

impl WardenService {
    /// Start both triggers.
    pub fn on_start(
        enforcer: Arc<Enforcer>,
        refresher: Arc<ConfigRefresher>,
        context: Arc<SchedulerContext>,
        intervals: Intervals,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = tokio::spawn(run_scheduler(enforcer, refresher, intervals, shutdown_rx));
        info!("warden service started");
        Self {
            context,
            shutdown_tx,
            scheduler: Some(scheduler),
        }
    }

    /// Orderly stop: raise the shutdown flag, then stop both triggers.
    pub async fn on_stop(&mut self) {
        self.stop_triggers().await;
        info!("warden service stopped");
    }

    /// The host is going down: same as stop, no escalation may follow.
    pub async fn on_shutdown(&mut self) {
        self.stop_triggers().await;
        info!("system is shutting down");
    }

    /// Whether the scheduler task is still running.
    pub fn is_running(&self) -> bool {
        self.scheduler
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn stop_triggers(&mut self) {
        self.context.begin_shutdown();
        // The receiver lives in the scheduler; an error means it already exited.
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.scheduler.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
    }
}
