//! Time-bounded host calls.

use std::time::Duration;

use warden::host::{bounded, HostError};

#[tokio::test(start_paused = true)]
async fn call_past_budget_times_out() {
    let result: Result<(), HostError> = bounded("account deletion", Duration::from_secs(5), async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    })
    .await;

    match result {
        Err(HostError::Timeout { operation, seconds }) => {
            assert_eq!(operation, "account deletion");
            assert_eq!(seconds, 5);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn call_within_budget_passes_result_through() {
    let ok = bounded("process enumeration", Duration::from_secs(5), async {
        Ok::<_, HostError>(7_u32)
    })
    .await;
    assert!(matches!(ok, Ok(7)));

    let err = bounded("process termination", Duration::from_secs(5), async {
        Err::<(), _>(HostError::ProcessGone { pid: 42 })
    })
    .await;
    assert!(matches!(err, Err(HostError::ProcessGone { pid: 42 })));
}

#[test]
fn errors_render_for_logs() {
    let timeout = HostError::Timeout {
        operation: "account deletion",
        seconds: 5,
    };
    assert_eq!(timeout.to_string(), "account deletion timed out after 5s");
    assert_eq!(
        HostError::AccountNotFound {
            name: "mallory".to_owned()
        }
        .to_string(),
        "account 'mallory' not found"
    );
}
