//! Request/response contract with the authorization daemon.
//!
//! The request is a bodyless HTTPS GET:
//!
//! ```text
//! https://{host}/checkForAuthToken?level={1|2|3}[&hmac={value}]
//! ```
//!
//! The verdict comes back in zero or more `foundBT` response headers. Every
//! occurrence must be exactly `true` for the cycle to count as authorized.

use hyper::header::HeaderMap;
use tracing::debug;

use crate::error::AgentError;
use crate::types::{ClientConfig, Verdict};

/// Path of the authorization check endpoint.
pub const AUTH_PATH: &str = "/checkForAuthToken";

/// Response header carrying the verdict.
pub const VERDICT_HEADER: &str = "foundBT";

/// The only header value that counts as a positive verdict.
pub const AUTHORIZED_VALUE: &str = "true";

// ============================================================================
// AuthRequest
// ============================================================================

/// Encoded authorization request for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    authority: String,
    host: String,
    port: u16,
    path_and_query: String,
}

impl AuthRequest {
    /// Encodes the request for the given configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut path_and_query = format!("{}?level={}", AUTH_PATH, config.security_level);
        if let Some(hmac) = config.effective_hmac() {
            path_and_query.push_str("&hmac=");
            path_and_query.push_str(hmac);
        }

        Self {
            authority: config.endpoint_host.clone(),
            host: config.host().to_string(),
            port: config.port(),
            path_and_query,
        }
    }

    /// Full request URL.
    pub fn url(&self) -> String {
        format!("https://{}{}", self.authority, self.path_and_query)
    }

    /// `host[:port]` as configured, used for the `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Host to resolve and present as the TLS server name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port to connect to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request target sent on the wire.
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }
}

/// Returns the request URL for the given configuration.
pub fn request_url(config: &ClientConfig) -> String {
    AuthRequest::from_config(config).url()
}

// ============================================================================
// Verdict decoding
// ============================================================================

/// Decodes the daemon's verdict from response headers.
///
/// - no `foundBT` header: `Indeterminate`
/// - every occurrence exactly `true`: `Authorized`
/// - otherwise the first non-`true` occurrence makes it `Denied`
pub fn decode_verdict(headers: &HeaderMap) -> Verdict {
    let mut values = headers.get_all(VERDICT_HEADER).iter().peekable();

    if values.peek().is_none() {
        return Verdict::Indeterminate(AgentError::ProtocolDecode(
            "no verdict header".to_string(),
        ));
    }

    for value in values {
        debug!("foundBT: {:?}", value);
        if value.as_bytes() != AUTHORIZED_VALUE.as_bytes() {
            return Verdict::Denied;
        }
    }

    Verdict::Authorized
}

// ============================================================================
// Tests
// ============================================================================
