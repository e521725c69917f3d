//! btlock Library
//!
//! This library provides the core functionality for the btlock agent.
//! It includes:
//! - Pinned certificate loading and storage
//! - TLS transport that trusts only the pinned daemon certificate
//! - Authorization request encoding and verdict decoding
//! - Polling controller that locks the workstation when presence is lost
//! - Platform lock commands
//! - Persisted settings and CLI utilities

pub mod agent;
pub mod cli;
pub mod error;
pub mod lock;
pub mod protocol;
pub mod settings;
pub mod tls;
pub mod trust;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use agent::{PollEvent, PollingController, StopReason};
pub use error::AgentError;
pub use lock::{LockAction, MockLockAction, SystemLockAction};
pub use protocol::{decode_verdict, request_url, AuthRequest};
pub use settings::{AgentSettings, SettingsError};
pub use tls::{DaemonConnector, MockDaemonConnector, PinnedTlsConnector};
pub use trust::{CertificateStore, TrustAnchor};
pub use types::{ClientConfig, PollState, SecurityLevel, Verdict};
