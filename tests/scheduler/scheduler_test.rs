//! Shared tick counter, shutdown flag and the trigger loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use warden::config::{PathsConfig, PolicyPaths, RefreshConfig};
use warden::enforcement::Enforcer;
use warden::host::fake::FakeHost;
use warden::host::Host;
use warden::policy::PolicyStore;
use warden::refresher::ConfigRefresher;
use warden::scheduler::{run_scheduler, Intervals, SchedulerContext};

#[test]
fn counter_starts_at_zero_and_advances_by_one() {
    let context = SchedulerContext::new();
    assert_eq!(context.ticks(), 0);
    assert_eq!(context.advance(), 1);
    assert_eq!(context.advance(), 2);
    assert_eq!(context.ticks(), 2);
}

#[test]
fn shutdown_flag_is_raised_exactly_once() {
    let context = SchedulerContext::new();
    assert!(!context.is_shutting_down());
    assert!(context.begin_shutdown());
    assert!(!context.begin_shutdown());
    assert!(context.is_shutting_down());
}

#[test]
fn counter_is_shared_across_threads() {
    let context = Arc::new(SchedulerContext::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let context = Arc::clone(&context);
            std::thread::spawn(move || {
                for _ in 0..250 {
                    context.advance();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread should finish");
    }
    assert_eq!(context.ticks(), 1000);
}

#[tokio::test]
async fn scheduler_ticks_until_sender_is_dropped() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let paths = PolicyPaths::resolve(&PathsConfig::default(), dir.path());
    std::fs::write(&paths.forbidden_list, "bad.exe\n").expect("write forbidden list");

    let host = Arc::new(FakeHost::new());
    host.add_process("bad.exe", 9_100_001, &[1]);
    let context = Arc::new(SchedulerContext::new());
    let dyn_host: Arc<dyn Host> = Arc::clone(&host) as Arc<dyn Host>;
    let enforcer = Arc::new(Enforcer::new(
        dyn_host,
        Arc::new(PolicyStore::new(paths.clone())),
        Arc::clone(&context),
        Default::default(),
        Duration::from_secs(5),
    ));
    let refresher = Arc::new(
        ConfigRefresher::new(paths.remote_url, paths.forbidden_list, &RefreshConfig::default())
            .expect("refresher should build"),
    );

    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(run_scheduler(
        enforcer,
        refresher,
        Intervals {
            fast: Duration::from_millis(20),
            slow: Duration::from_secs(60),
        },
        rx,
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("scheduler should exit once the sender is gone")
        .expect("scheduler task should not panic");

    assert!(context.ticks() >= 2);
    assert_eq!(host.terminate_requests(), vec![9_100_001]);
}
