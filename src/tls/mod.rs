//! Pinned TLS transport to the authorization daemon.
//!
//! - `verifier`: rustls verifier trusting only the pinned certificate
//! - `chain`: post-handshake check of every presented certificate
//! - `connector`: TCP + TLS + HTTP/1.1 for one request per connection
//!
//! The [`DaemonConnector`] trait is the seam the polling controller talks
//! through; [`MockDaemonConnector`] scripts responses for tests.

pub mod chain;
pub mod connector;
pub mod verifier;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use hyper::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{AgentError, Result};
use crate::trust::TrustAnchor;
use crate::types::ClientConfig;

pub use chain::verify_chain;
pub use connector::{ConnectionGuard, ConnectionTracker, OpenConnection, PinnedTlsConnector};
pub use verifier::PinnedServerVerifier;

// ============================================================================
// DaemonConnector Trait
// ============================================================================

/// Performs one authorization exchange with the daemon.
pub trait DaemonConnector: Send + Sync + 'static {
    /// Connects, sends the request for `config` and returns the response
    /// headers. Dropping the future closes any connection it opened.
    fn query(
        &self,
        config: &ClientConfig,
        anchor: &TrustAnchor,
    ) -> impl Future<Output = Result<HeaderMap>> + Send;
}

impl DaemonConnector for PinnedTlsConnector {
    fn query(
        &self,
        config: &ClientConfig,
        anchor: &TrustAnchor,
    ) -> impl Future<Output = Result<HeaderMap>> + Send {
        async move {
            let connection = self.connect(config, anchor).await?;
            connection.query().await
        }
    }
}

// ============================================================================
// Mock Implementation
// ============================================================================

/// Scripted connector for tests.
///
/// Responses are served in order; once the script runs out the fallback
/// response is repeated. A stalled connector never answers and holds its
/// connection open until the query future is dropped.
#[derive(Debug)]
pub struct MockDaemonConnector {
    script: Mutex<VecDeque<Result<HeaderMap>>>,
    fallback: Result<HeaderMap>,
    stalled: AtomicBool,
    query_count: AtomicUsize,
    tracker: ConnectionTracker,
}

impl MockDaemonConnector {
    /// A connector that answers every query with `fallback`.
    #[must_use]
    pub fn new(fallback: Result<HeaderMap>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            stalled: AtomicBool::new(false),
            query_count: AtomicUsize::new(0),
            tracker: ConnectionTracker::new(),
        }
    }

    /// A connector that always reports `foundBT: true`.
    #[must_use]
    pub fn authorized() -> Self {
        Self::new(Ok(verdict_headers(&["true"])))
    }

    /// A connector that always reports `foundBT: false`.
    #[must_use]
    pub fn denied() -> Self {
        Self::new(Ok(verdict_headers(&["false"])))
    }

    /// A connector that always fails with `error`.
    #[must_use]
    pub fn failing(error: AgentError) -> Self {
        Self::new(Err(error))
    }

    /// A connector that never answers.
    #[must_use]
    pub fn stalled() -> Self {
        let mock = Self::authorized();
        mock.stalled.store(true, Ordering::SeqCst);
        mock
    }

    /// Queues responses served before the fallback.
    #[must_use]
    pub fn with_script(self, responses: impl IntoIterator<Item = Result<HeaderMap>>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(responses);
        self
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.tracker.open()
    }
}

impl DaemonConnector for MockDaemonConnector {
    fn query(
        &self,
        _config: &ClientConfig,
        _anchor: &TrustAnchor,
    ) -> impl Future<Output = Result<HeaderMap>> + Send {
        async move {
            self.query_count.fetch_add(1, Ordering::SeqCst);
            let _guard = self.tracker.acquire();

            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }

            let next = self
                .script
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }
}

/// Builds response headers carrying the given `foundBT` values.
pub fn verdict_headers(values: &[&str]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let name = HeaderName::from_static("foundbt");
    for value in values {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.append(name.clone(), value);
        }
    }
    headers
}
