//! Error taxonomy for the agent core.
//!
//! Every failure the core can report collapses into [`AgentError`]. Per-cycle
//! failures are carried inside [`crate::types::Verdict::Indeterminate`], so the
//! enum is `Clone + Eq` and holds plain string details.

use thiserror::Error;

/// Errors raised by certificate loading, the pinned connector, the
/// authorization protocol, the polling controller, and the lock action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// No certificate path configured, or the file is absent/unreadable.
    #[error("Daemon certificate not found: {0}")]
    CertFileMissing(String),

    /// The bytes are not exactly one X.509 certificate.
    #[error("Failed to parse daemon certificate: {0}")]
    CertParse(String),

    /// Activation was requested before a certificate was loaded.
    #[error("No daemon certificate loaded; load the certificate before activating")]
    NotReady,

    /// The client configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Activation was requested while a session is already running.
    #[error("Polling is already active")]
    AlreadyActive,

    /// Network-level I/O failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// TLS context setup failed or the handshake was rejected.
    #[error("TLS handshake error: {0}")]
    Handshake(String),

    /// A presented certificate is not signed by the pinned public key.
    #[error("Pinned key verification failed: {0}")]
    ChainVerification(String),

    /// The response carried no decodable verdict.
    #[error("Malformed daemon response: {0}")]
    ProtocolDecode(String),

    /// The host session lock could not be triggered.
    #[error("Failed to lock the workstation: {0}")]
    LockAction(String),
}

impl AgentError {
    /// Returns true if this error means the daemon failed cryptographic
    /// verification and must be treated as hostile.
    #[must_use]
    pub fn is_security_incident(&self) -> bool {
        matches!(self, Self::ChainVerification(_))
    }

    /// Returns true if this error comes from loading the pinned certificate.
    #[must_use]
    pub fn is_certificate_error(&self) -> bool {
        matches!(self, Self::CertFileMissing(_) | Self::CertParse(_))
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::CertFileMissing(_) => {
                "btlock configure --cert <PATH> でデーモン証明書を指定してください"
            }
            Self::CertParse(_) => "PEMまたはDER形式の証明書を1つだけ含むファイルを指定してください",
            Self::NotReady => "先にデーモン証明書を読み込んでください",
            Self::InvalidConfig(_) => "btlock configure で設定を確認してください",
            Self::AlreadyActive => "既に監視中です",
            Self::Transport(_) => "デーモンが起動しているか、ホストとポートを確認してください",
            Self::Handshake(_) => "デーモンの証明書と pinnedHost の設定を確認してください",
            Self::ChainVerification(_) => {
                "デーモンの証明書が一致しません。中間者攻撃の可能性があります"
            }
            Self::ProtocolDecode(_) => "デーモンのバージョンを確認してください",
            Self::LockAction(_) => "lockCommand の設定を確認してください",
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, AgentError>;
