//! Integration tests for the polling controller over real TLS connections.
//!
//! These tests run the controller with the pinned TLS connector against a
//! local daemon stub and a recording lock action:
//! - Authorized verdicts keep polling without locking
//! - Denied verdicts and pin mismatches lock once and stop
//! - Deactivation closes an in-flight connection

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use btlock::agent::{PollEvent, PollingController, StopReason};
use btlock::error::AgentError;
use btlock::lock::MockLockAction;
use btlock::tls::PinnedTlsConnector;
use btlock::trust::CertificateStore;
use btlock::types::{ClientConfig, PollState, Verdict};

use common::{ca_and_leaf, self_signed, Behavior, TestCert, TestDaemon};

type Controller = PollingController<PinnedTlsConnector, MockLockAction>;

// ============================================================================
// Test Helpers
// ============================================================================

fn create_controller(pinned: &TestCert) -> (Controller, mpsc::UnboundedReceiver<PollEvent>) {
    let dir = tempfile::tempdir().unwrap();
    let path = pinned.write_pem(dir.path(), "daemon.pem");
    let store = Arc::new(CertificateStore::new());
    store.load(&path).unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = PollingController::new(
        store,
        Arc::new(PinnedTlsConnector::new()),
        Arc::new(MockLockAction::new()),
    )
    .with_events(tx);
    (controller, rx)
}

fn config_for(daemon: &TestDaemon) -> ClientConfig {
    ClientConfig::new(daemon.endpoint())
        .with_poll_interval(1)
        .with_io_timeout(5)
}

async fn wait_inactive(controller: &Controller) {
    let mut state = controller.subscribe();
    tokio::time::timeout(Duration::from_secs(10), state.wait_for(|s| !s.is_active()))
        .await
        .expect("controller did not stop")
        .unwrap();
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PollEvent>) -> Vec<PollEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn authorized_daemon_keeps_session_active() {
    let cert = self_signed("localhost");
    let daemon = TestDaemon::with_verdict(&cert, &["true"]).await;
    let (controller, mut rx) = create_controller(&cert);

    controller.activate(config_for(&daemon)).await.unwrap();
    daemon.wait_accepted(2).await;

    assert!(controller.is_active());
    assert_eq!(controller.lock_action().call_count(), 0);

    controller.deactivate().await;
    assert_eq!(controller.state(), PollState::Inactive);
    assert_eq!(controller.connector().open_connections(), 0);

    let events = drain(&mut rx);
    assert!(events.contains(&PollEvent::CycleCompleted {
        cycle: 1,
        verdict: Verdict::Authorized
    }));
    assert!(!events.contains(&PollEvent::LockTriggered));
}

#[tokio::test]
async fn denied_daemon_locks_and_deactivates() {
    let cert = self_signed("localhost");
    let daemon = TestDaemon::with_verdict(&cert, &["false"]).await;
    let (controller, mut rx) = create_controller(&cert);

    controller.activate(config_for(&daemon)).await.unwrap();
    wait_inactive(&controller).await;

    assert_eq!(controller.lock_action().call_count(), 1);
    assert_eq!(controller.connector().open_connections(), 0);

    let events = drain(&mut rx);
    let lock_at = events
        .iter()
        .position(|e| *e == PollEvent::LockTriggered)
        .expect("lock event");
    let stop_at = events
        .iter()
        .position(|e| {
            *e == PollEvent::Deactivated {
                reason: StopReason::Denied,
            }
        })
        .expect("deactivation event");
    assert!(lock_at < stop_at);
}

#[tokio::test]
async fn pin_mismatch_locks_once_with_no_further_cycles() {
    let (ca, leaf) = ca_and_leaf("localhost");
    let stray = self_signed("stray.local");
    let daemon = TestDaemon::start(
        vec![leaf.der.clone(), stray.der.clone()],
        &leaf.key_pair,
        Behavior::verdict(&["true"]),
    )
    .await;
    let (controller, mut rx) = create_controller(&ca);

    controller.activate(config_for(&daemon)).await.unwrap();
    wait_inactive(&controller).await;

    // Longer than one poll interval.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(controller.lock_action().call_count(), 1);
    assert_eq!(daemon.accepted(), 1);
    assert!(daemon.requests().is_empty());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        PollEvent::Deactivated {
            reason: StopReason::Failed(AgentError::ChainVerification(_))
        }
    )));
}

#[tokio::test]
async fn foreign_daemon_certificate_locks() {
    let pinned = self_signed("localhost");
    let impostor = self_signed("localhost");
    let daemon = TestDaemon::with_verdict(&impostor, &["true"]).await;
    let (controller, _rx) = create_controller(&pinned);

    controller.activate(config_for(&daemon)).await.unwrap();
    wait_inactive(&controller).await;

    assert_eq!(controller.lock_action().call_count(), 1);
}

#[tokio::test]
async fn unreachable_daemon_locks() {
    let cert = self_signed("localhost");
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let (controller, _rx) = create_controller(&cert);

    controller
        .activate(ClientConfig::new(format!("127.0.0.1:{}", port)).with_io_timeout(2))
        .await
        .unwrap();
    wait_inactive(&controller).await;

    assert_eq!(controller.lock_action().call_count(), 1);
}

#[tokio::test]
async fn deactivate_closes_stalled_connection() {
    let cert = self_signed("localhost");
    let daemon = TestDaemon::start(vec![cert.der.clone()], &cert.key_pair, Behavior::Stall).await;
    let (controller, _rx) = create_controller(&cert);

    controller
        .activate(
            ClientConfig::new(daemon.endpoint())
                .with_poll_interval(1)
                .with_io_timeout(60),
        )
        .await
        .unwrap();
    common::wait_until(|| !daemon.requests().is_empty()).await;
    assert_eq!(controller.connector().open_connections(), 1);

    tokio::time::timeout(Duration::from_secs(2), controller.deactivate())
        .await
        .expect("deactivate waited for the stalled daemon");

    assert_eq!(controller.connector().open_connections(), 0);
    assert_eq!(controller.lock_action().call_count(), 0);
    daemon.wait_closed(1).await;
}
