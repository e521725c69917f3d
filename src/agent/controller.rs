//! Polling controller.
//!
//! Owns the activation state machine:
//!
//! ```text
//! Inactive --activate--> Active --deactivate--> Inactive
//!                          |
//!                          +--cycle not authorized--> lock --> Inactive
//! ```
//!
//! While active, one background task runs a cycle every poll interval.
//! Any cycle that does not end with an `Authorized` verdict runs the lock
//! action once and stops polling. There is no retry.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::{PollEvent, StopReason};
use crate::error::{AgentError, Result};
use crate::lock::LockAction;
use crate::protocol::{decode_verdict, request_url};
use crate::tls::DaemonConnector;
use crate::trust::{CertificateStore, TrustAnchor};
use crate::types::{ClientConfig, PollState, Verdict};

// ============================================================================
// PollingController
// ============================================================================

/// Drives periodic authorization checks and the lock on failure.
pub struct PollingController<C, L> {
    store: Arc<CertificateStore>,
    connector: Arc<C>,
    lock: Arc<L>,
    state_tx: Arc<watch::Sender<PollState>>,
    event_tx: Option<mpsc::UnboundedSender<PollEvent>>,
    session: Mutex<Option<Session>>,
}

/// The running polling task and the token that stops it.
struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl<C, L> PollingController<C, L>
where
    C: DaemonConnector,
    L: LockAction,
{
    pub fn new(store: Arc<CertificateStore>, connector: Arc<C>, lock: Arc<L>) -> Self {
        let (state_tx, _) = watch::channel(PollState::Inactive);
        Self {
            store,
            connector,
            lock,
            state_tx: Arc::new(state_tx),
            event_tx: None,
            session: Mutex::new(None),
        }
    }

    /// Sends [`PollEvent`]s to `event_tx`.
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<PollEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn state(&self) -> PollState {
        *self.state_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    pub fn lock_action(&self) -> &Arc<L> {
        &self.lock
    }

    /// Starts polling with `config`.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `config` fails validation
    /// - `NotReady` if no certificate is loaded
    /// - `AlreadyActive` if polling is already running
    pub async fn activate(&self, config: ClientConfig) -> Result<()> {
        config.validate().map_err(AgentError::InvalidConfig)?;
        let anchor = self.store.current_anchor().ok_or(AgentError::NotReady)?;

        let mut session = self.session.lock().await;
        if self.is_active() {
            return Err(AgentError::AlreadyActive);
        }

        // A session that stopped itself leaves a finished task behind.
        if let Some(finished) = session.take() {
            finished.cancel.cancel();
            if let Err(e) = finished.handle.await {
                warn!("Previous polling task ended abnormally: {}", e);
            }
        }

        let url = request_url(&config);
        info!(
            "Polling activated: {} every {}s",
            url, config.poll_interval_seconds
        );
        self.state_tx.send_replace(PollState::Active);
        emit(&self.event_tx, PollEvent::Activated { url });

        let cancel = CancellationToken::new();
        let runner = SessionRunner {
            connector: Arc::clone(&self.connector),
            lock: Arc::clone(&self.lock),
            state_tx: Arc::clone(&self.state_tx),
            event_tx: self.event_tx.clone(),
            config,
            anchor,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(runner.run());
        *session = Some(Session { cancel, handle });

        Ok(())
    }

    /// Stops polling.
    ///
    /// Returns once the polling task has ended and any in-flight
    /// connection is closed. Calling it while inactive does nothing.
    pub async fn deactivate(&self) {
        let mut session = self.session.lock().await;
        if let Some(running) = session.take() {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!("Polling task ended abnormally: {}", e);
            }
        }

        let previous = self.state_tx.send_replace(PollState::Inactive);
        if previous.is_active() {
            info!("Polling deactivated");
            emit(
                &self.event_tx,
                PollEvent::Deactivated {
                    reason: StopReason::Requested,
                },
            );
        }
    }
}

// ============================================================================
// SessionRunner
// ============================================================================

/// Everything one polling task needs; moved into the spawned task.
struct SessionRunner<C, L> {
    connector: Arc<C>,
    lock: Arc<L>,
    state_tx: Arc<watch::Sender<PollState>>,
    event_tx: Option<mpsc::UnboundedSender<PollEvent>>,
    config: ClientConfig,
    anchor: Arc<TrustAnchor>,
    cancel: CancellationToken,
}

impl<C, L> SessionRunner<C, L>
where
    C: DaemonConnector,
    L: LockAction,
{
    async fn run(self) {
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            debug!("Poll cycle {} starting", cycle);

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Poll cycle {} cancelled", cycle);
                    return;
                }
                outcome = self.connector.query(&self.config, &self.anchor) => outcome,
            };

            let verdict = match outcome {
                Ok(headers) => decode_verdict(&headers),
                Err(e) => Verdict::Indeterminate(e),
            };
            log_verdict(cycle, &verdict);
            emit(
                &self.event_tx,
                PollEvent::CycleCompleted {
                    cycle,
                    verdict: verdict.clone(),
                },
            );

            if let Some(reason) = stop_reason(verdict) {
                self.enforce_lock().await;
                self.state_tx.send_replace(PollState::Inactive);
                info!("Polling stopped after cycle {}", cycle);
                emit(&self.event_tx, PollEvent::Deactivated { reason });
                return;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
    }

    /// Runs the lock action once. Not cancellable.
    async fn enforce_lock(&self) {
        warn!("Presence not confirmed; locking workstation");
        match self.lock.lock().await {
            Ok(()) => {
                info!("Workstation locked");
                emit(&self.event_tx, PollEvent::LockTriggered);
            }
            Err(e) => {
                error!("Lock action failed: {}", e);
                emit(&self.event_tx, PollEvent::LockFailed { error: e });
            }
        }
    }
}

fn stop_reason(verdict: Verdict) -> Option<StopReason> {
    match verdict {
        Verdict::Authorized => None,
        Verdict::Denied => Some(StopReason::Denied),
        Verdict::Indeterminate(e) => Some(StopReason::Failed(e)),
    }
}

fn log_verdict(cycle: u64, verdict: &Verdict) {
    match verdict {
        Verdict::Authorized => debug!("Cycle {}: authorized", cycle),
        Verdict::Denied => warn!("Cycle {}: daemon denied presence", cycle),
        Verdict::Indeterminate(e) if e.is_security_incident() => {
            error!("Cycle {}: daemon failed pinned key verification: {}", cycle, e)
        }
        Verdict::Indeterminate(e) => warn!("Cycle {}: no verdict: {}", cycle, e),
    }
}

fn emit(event_tx: &Option<mpsc::UnboundedSender<PollEvent>>, event: PollEvent) {
    if let Some(tx) = event_tx {
        // Receiver gone means nobody is listening; polling carries on.
        let _ = tx.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================
