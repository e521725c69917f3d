//! Core data types for the btlock agent.
//!
//! This module defines the data structures used for:
//! - Security level selection sent to the daemon
//! - Client configuration with validation
//! - Poll state and per-cycle verdicts

use std::net::Ipv6Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default connect/read timeout in seconds.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

/// Upper bound for the connect/read timeout.
pub const MAX_IO_TIMEOUT_SECS: u64 = 300;

/// Port used when the endpoint omits one.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

// ============================================================================
// SecurityLevel
// ============================================================================

/// Which combination of factors the daemon should check.
///
/// The agent does not evaluate these factors itself; the level is only sent
/// to the daemon and decides whether the HMAC is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SecurityLevel {
    /// Proximity detection only
    ProximityOnly,
    /// Proximity detection and OTP
    ProximityOtp,
    /// Proximity detection, OTP and HMAC
    ProximityOtpHmac,
}

impl SecurityLevel {
    /// Returns the numeric level used on the wire.
    pub fn as_u8(&self) -> u8 {
        match self {
            SecurityLevel::ProximityOnly => 1,
            SecurityLevel::ProximityOtp => 2,
            SecurityLevel::ProximityOtpHmac => 3,
        }
    }

    /// Returns a short human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            SecurityLevel::ProximityOnly => "Proximity Detection",
            SecurityLevel::ProximityOtp => "Proximity D. + OTP",
            SecurityLevel::ProximityOtpHmac => "Proximity D. + OTP + HMAC",
        }
    }

    /// Returns true if requests at this level carry an HMAC.
    pub fn requires_hmac(&self) -> bool {
        matches!(self, SecurityLevel::ProximityOtpHmac)
    }
}

impl Default for SecurityLevel {
    fn default() -> Self {
        SecurityLevel::ProximityOnly
    }
}

impl TryFrom<u8> for SecurityLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SecurityLevel::ProximityOnly),
            2 => Ok(SecurityLevel::ProximityOtp),
            3 => Ok(SecurityLevel::ProximityOtpHmac),
            other => Err(format!(
                "セキュリティレベルは1-3の範囲で指定してください (指定値: {})",
                other
            )),
        }
    }
}

impl From<SecurityLevel> for u8 {
    fn from(level: SecurityLevel) -> Self {
        level.as_u8()
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated settings for one polling session.
///
/// Captured by the controller at activation and never mutated while the
/// session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Daemon authority, `host` or `host:port`
    pub endpoint_host: String,
    /// Address the daemon's TLS server name must match (defaults to the endpoint host)
    pub expected_host: Option<String>,
    /// Security level sent to the daemon
    pub security_level: SecurityLevel,
    /// Pre-computed HMAC, forwarded at level 3
    pub hmac: Option<String>,
    /// Seconds to sleep between cycles
    pub poll_interval_seconds: u64,
    /// Connect/handshake/read timeout in seconds
    pub io_timeout_seconds: u64,
}

impl ClientConfig {
    /// Creates a level 1 configuration for the given daemon authority.
    pub fn new(endpoint_host: impl Into<String>) -> Self {
        Self {
            endpoint_host: endpoint_host.into(),
            expected_host: None,
            security_level: SecurityLevel::default(),
            hmac: None,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
            io_timeout_seconds: DEFAULT_IO_TIMEOUT_SECS,
        }
    }

    /// Sets the security level.
    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    /// Sets the HMAC forwarded at level 3.
    pub fn with_hmac(mut self, hmac: impl Into<String>) -> Self {
        self.hmac = Some(hmac.into());
        self
    }

    /// Sets the poll interval in seconds.
    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    /// Sets the connect/read timeout in seconds.
    pub fn with_io_timeout(mut self, seconds: u64) -> Self {
        self.io_timeout_seconds = seconds;
        self
    }

    /// Pins hostname verification to the given address.
    pub fn with_expected_host(mut self, host: impl Into<String>) -> Self {
        self.expected_host = Some(host.into());
        self
    }

    /// Returns the host part of the endpoint (IPv6 brackets removed).
    pub fn host(&self) -> &str {
        split_authority(&self.endpoint_host).0
    }

    /// Returns the endpoint port, or 443 when none is given.
    pub fn port(&self) -> u16 {
        split_authority(&self.endpoint_host)
            .1
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_HTTPS_PORT)
    }

    /// Returns the address hostname verification is pinned to.
    pub fn pinned_host(&self) -> &str {
        self.expected_host.as_deref().unwrap_or_else(|| self.host())
    }

    /// Returns the HMAC only when it must be attached to the request.
    pub fn effective_hmac(&self) -> Option<&str> {
        if !self.security_level.requires_hmac() {
            return None;
        }
        self.hmac.as_deref().filter(|h| !h.is_empty())
    }

    /// Returns the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Returns the connect/read timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        validate_authority(&self.endpoint_host)?;

        if let Some(expected) = &self.expected_host {
            if !is_valid_host(expected) {
                return Err(format!("pinnedHost が不正です: '{}'", expected));
            }
        }

        if self.security_level.requires_hmac() {
            match self.hmac.as_deref() {
                Some(h) if !h.is_empty() => {}
                _ => return Err("セキュリティレベル3ではHMACの指定が必要です".to_string()),
            }
        }

        if let Some(hmac) = &self.hmac {
            if !hmac.chars().all(is_query_safe) {
                return Err("HMACに使用できない文字が含まれています".to_string());
            }
        }

        if self.poll_interval_seconds < 1 {
            return Err("ポーリング間隔は1秒以上で指定してください".to_string());
        }

        if self.io_timeout_seconds < 1 || self.io_timeout_seconds > MAX_IO_TIMEOUT_SECS {
            return Err(format!(
                "タイムアウトは1-{}秒の範囲で指定してください",
                MAX_IO_TIMEOUT_SECS
            ));
        }

        Ok(())
    }
}

/// Splits `host[:port]` or `[v6]:port` into host and optional port text.
fn split_authority(authority: &str) -> (&str, Option<&str>) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            return (host, tail.strip_prefix(':'));
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => (host, Some(port)),
        _ => (authority, None),
    }
}

fn is_host_safe(host: &str) -> bool {
    host.chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, '/' | '?' | '#' | '@' | '\\'))
}

/// Whether `host` is usable as a bare daemon host.
///
/// A `:` is only allowed as part of an IPv6 literal, so a host never
/// carries its own port.
pub fn is_valid_host(host: &str) -> bool {
    if host.is_empty() || !is_host_safe(host) {
        return false;
    }
    !host.contains(':') || host.parse::<Ipv6Addr>().is_ok()
}

fn is_query_safe(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '&' | '#')
}

fn validate_authority(authority: &str) -> Result<(), String> {
    if authority.is_empty() {
        return Err("デーモンのホストを指定してください".to_string());
    }
    if !is_host_safe(authority) {
        return Err(format!("ホストに使用できない文字が含まれています: '{}'", authority));
    }
    let (host, port) = split_authority(authority);
    if host.is_empty() {
        return Err("デーモンのホストを指定してください".to_string());
    }
    if !is_valid_host(host) {
        return Err(format!("ホストが不正です: '{}'", host));
    }
    if let Some(port) = port {
        match port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => return Err(format!("ポート番号が不正です: '{}'", port)),
        }
    }
    Ok(())
}

// ============================================================================
// PollState
// ============================================================================

/// Activation state of the polling controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// Not polling
    Inactive,
    /// Polling the daemon
    Active,
}

impl PollState {
    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            PollState::Inactive => "inactive",
            PollState::Active => "active",
        }
    }

    /// Returns true if a session is running.
    pub fn is_active(&self) -> bool {
        matches!(self, PollState::Active)
    }
}

impl Default for PollState {
    fn default() -> Self {
        PollState::Inactive
    }
}

// ============================================================================
// Verdict
// ============================================================================

/// Authorization decision for one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The daemon vouched for the user
    Authorized,
    /// The daemon answered with a negative verdict
    Denied,
    /// No trustworthy verdict could be obtained
    Indeterminate(AgentError),
}

impl Verdict {
    /// Returns true only for a decoded positive verdict.
    pub fn is_authorized(&self) -> bool {
        matches!(self, Verdict::Authorized)
    }

    /// Returns the string representation of the verdict.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Authorized => "authorized",
            Verdict::Denied => "denied",
            Verdict::Indeterminate(_) => "indeterminate",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
