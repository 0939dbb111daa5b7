//! Tests for the reboot escalation path.

use std::sync::Arc;

use warden::host::fake::FakeHost;
use warden::host::Host;
use warden::power::{Escalation, EscalationReason, PowerController, ProtectedFailure};
use warden::scheduler::SchedulerContext;

fn controller() -> (Arc<FakeHost>, Arc<SchedulerContext>, PowerController) {
    let host = Arc::new(FakeHost::new());
    let context = Arc::new(SchedulerContext::new());
    let dyn_host: Arc<dyn Host> = Arc::clone(&host) as Arc<dyn Host>;
    let power = PowerController::new(dyn_host, Arc::clone(&context));
    (host, context, power)
}

#[tokio::test]
async fn escalation_acquires_privilege_then_reboots() {
    let (host, _context, power) = controller();

    let result = power
        .escalate_to_reboot(&EscalationReason::NetworkUnreachable)
        .await;
    assert_eq!(result, Escalation::Issued);
    assert_eq!(host.privilege_requests(), 1);
    assert_eq!(host.reboot_requests(), 1);
}

#[tokio::test]
async fn escalation_is_suppressed_during_shutdown() {
    let (host, context, power) = controller();
    context.begin_shutdown();

    let result = power
        .escalate_to_reboot(&EscalationReason::NetworkUnreachable)
        .await;
    assert_eq!(result, Escalation::Suppressed);
    assert_eq!(host.privilege_requests(), 0);
    assert_eq!(host.reboot_requests(), 0);
}

#[tokio::test]
async fn privilege_failure_still_attempts_reboot() {
    let (host, _context, power) = controller();
    host.fail_privilege();

    let result = power
        .escalate_to_reboot(&EscalationReason::NetworkUnreachable)
        .await;
    assert_eq!(result, Escalation::Issued);
    assert_eq!(host.reboot_requests(), 1);
}

#[tokio::test]
async fn failed_reboot_is_reported() {
    let (host, _context, power) = controller();
    host.fail_reboot();

    let result = power
        .escalate_to_reboot(&EscalationReason::NetworkUnreachable)
        .await;
    assert!(matches!(result, Escalation::Failed(msg) if msg.contains("reboot refused")));
}

#[test]
fn reasons_render_for_logs() {
    let missing = EscalationReason::ProtectedProcess {
        entry: "guard.exe".to_owned(),
        failure: ProtectedFailure::Missing,
    };
    let suspended = EscalationReason::ProtectedProcess {
        entry: "guard.exe".to_owned(),
        failure: ProtectedFailure::Suspended,
    };
    assert_eq!(missing.to_string(), "protected process 'guard.exe' is not running");
    assert_eq!(suspended.to_string(), "protected process 'guard.exe' is suspended");
    assert_eq!(
        EscalationReason::NetworkUnreachable.to_string(),
        "network is unreachable"
    );
}

#[test]
fn reasons_serialise_with_kind_tag() {
    let reason = EscalationReason::ProtectedProcess {
        entry: "guard.exe".to_owned(),
        failure: ProtectedFailure::Suspended,
    };
    let json = serde_json::to_value(&reason).expect("serialise reason");
    assert_eq!(json["kind"], "protected_process");
    assert_eq!(json["failure"], "suspended");
}
