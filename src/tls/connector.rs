//! Pinned TLS connections to the authorization daemon.
//!
//! One connection serves exactly one request. The handshake and request
//! are each bounded by the configured I/O timeout; dropping an
//! [`OpenConnection`] (or the future driving it) closes the socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HOST, USER_AGENT};
use hyper::Request;
use hyper_util::rt::TokioIo;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error};

use super::chain::verify_chain;
use super::verifier::PinnedServerVerifier;
use crate::error::{AgentError, Result};
use crate::protocol::AuthRequest;
use crate::trust::TrustAnchor;
use crate::types::ClientConfig;

const USER_AGENT_VALUE: &str = concat!("btlock/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Connection tracking
// ============================================================================

/// Counts connections that are currently open.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections not yet closed.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Marks a connection as open until the returned guard is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open: Arc::clone(&self.open),
        }
    }
}

/// Held for the lifetime of one connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// PinnedTlsConnector
// ============================================================================

/// Opens TLS connections that trust only the pinned daemon certificate.
#[derive(Debug, Clone)]
pub struct PinnedTlsConnector {
    provider: Arc<CryptoProvider>,
    tracker: ConnectionTracker,
}

impl Default for PinnedTlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PinnedTlsConnector {
    pub fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Number of connections opened by this connector that are still open.
    pub fn open_connections(&self) -> usize {
        self.tracker.open()
    }

    /// Builds the rustls configuration for one connection.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Handshake` if the configuration cannot be built.
    pub fn tls_config(
        &self,
        config: &ClientConfig,
        anchor: &TrustAnchor,
    ) -> Result<rustls::ClientConfig> {
        let verifier =
            PinnedServerVerifier::new(anchor, config.pinned_host(), Arc::clone(&self.provider))?;

        let tls = rustls::ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| AgentError::Handshake(format!("unsupported protocol versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(tls)
    }

    /// Connects to the daemon and verifies the presented chain.
    ///
    /// # Errors
    ///
    /// - `Transport` on TCP failure or timeout
    /// - `Handshake` when the TLS handshake is rejected
    /// - `ChainVerification` when a presented certificate is not signed by
    ///   the pinned key
    pub async fn connect(
        &self,
        config: &ClientConfig,
        anchor: &TrustAnchor,
    ) -> Result<OpenConnection> {
        let tls_config = self.tls_config(config, anchor)?;
        let request = AuthRequest::from_config(config);
        let io_timeout = config.io_timeout();

        let server_name = ServerName::try_from(request.host().to_string()).map_err(|e| {
            AgentError::Handshake(format!("invalid server name '{}': {}", request.host(), e))
        })?;

        debug!("Connecting to {}", request.url());
        let tcp = timeout(
            io_timeout,
            TcpStream::connect((request.host(), request.port())),
        )
        .await
        .map_err(|_| {
            AgentError::Transport(format!(
                "connect to {} timed out after {}s",
                request.authority(),
                io_timeout.as_secs()
            ))
        })?
        .map_err(|e| AgentError::Transport(format!("connect to {}: {}", request.authority(), e)))?;
        let guard = self.tracker.acquire();

        let connector = TlsConnector::from(Arc::new(tls_config));
        let stream = timeout(io_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| {
                AgentError::Transport(format!(
                    "TLS handshake with {} timed out after {}s",
                    request.authority(),
                    io_timeout.as_secs()
                ))
            })?
            .map_err(classify_handshake_error)?;

        let (_, session) = stream.get_ref();
        let presented = session.peer_certificates().unwrap_or_default();
        if let Err(e) = verify_chain(presented, anchor) {
            error!("Daemon at {} failed pinned key verification: {}", request.authority(), e);
            return Err(e);
        }
        debug!(
            "TLS session established with {} ({} certificate(s) verified)",
            request.authority(),
            presented.len()
        );

        Ok(OpenConnection {
            stream,
            request,
            io_timeout,
            _guard: guard,
        })
    }
}

/// A verified TLS connection ready for one authorization request.
pub struct OpenConnection {
    stream: TlsStream<TcpStream>,
    request: AuthRequest,
    io_timeout: Duration,
    _guard: ConnectionGuard,
}

impl std::fmt::Debug for OpenConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenConnection")
            .field("request", &self.request)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl OpenConnection {
    /// Sends the authorization request and returns the response headers.
    ///
    /// The connection is consumed and closed whatever the outcome.
    ///
    /// # Errors
    ///
    /// - `Transport` on I/O failure, premature close or timeout
    /// - `ProtocolDecode` when the response cannot be parsed as HTTP
    pub async fn query(self) -> Result<HeaderMap> {
        let OpenConnection {
            stream,
            request,
            io_timeout,
            _guard: guard,
        } = self;

        let exchange = async {
            let (mut sender, conn) =
                hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream))
                    .await
                    .map_err(classify_hyper_error)?;

            let http_request = Request::get(request.path_and_query())
                .header(HOST, request.authority())
                .header(USER_AGENT, USER_AGENT_VALUE)
                .body(Empty::<Bytes>::new())
                .map_err(|e| AgentError::InvalidConfig(format!("unencodable request: {}", e)))?;

            let send = sender.send_request(http_request);
            tokio::pin!(send);
            tokio::pin!(conn);

            let response = tokio::select! {
                biased;
                result = &mut send => result,
                conn_result = &mut conn => match send.await {
                    Ok(response) => Ok(response),
                    Err(e) => Err(conn_result.err().unwrap_or(e)),
                },
            }
            .map_err(classify_hyper_error)?;

            debug!("Daemon responded with status {}", response.status());
            let (parts, _body) = response.into_parts();
            Ok::<_, AgentError>(parts.headers)
        };

        let headers = timeout(io_timeout, exchange).await.map_err(|_| {
            AgentError::Transport(format!(
                "no response from {} within {}s",
                request.authority(),
                io_timeout.as_secs()
            ))
        })??;

        drop(guard);
        Ok(headers)
    }

    /// Closes the connection without sending a request.
    pub fn disconnect(self) {
        debug!("Closing connection to {}", self.request.authority());
    }
}

// ============================================================================
// Error classification
// ============================================================================

fn classify_handshake_error(e: std::io::Error) -> AgentError {
    match e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        Some(tls) => AgentError::Handshake(tls.to_string()),
        None => AgentError::Transport(format!("TLS handshake I/O: {}", e)),
    }
}

fn classify_hyper_error(e: hyper::Error) -> AgentError {
    if e.is_parse() || e.is_parse_status() {
        AgentError::ProtocolDecode(e.to_string())
    } else {
        AgentError::Transport(e.to_string())
    }
}
