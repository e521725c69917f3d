//! Command definitions for the btlock CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::AgentSettings;
use crate::types::{is_valid_host, SecurityLevel, MAX_IO_TIMEOUT_SECS};

// ============================================================================
// CLI Structure
// ============================================================================

/// btlock - proximity-based second factor for the desktop
#[derive(Parser, Debug)]
#[command(
    name = "btlock",
    version,
    about = "近接認証デーモンと連携する2要素ロックエージェント",
    long_about = "ピン留めした証明書で認証デーモンに定期的に問い合わせ、\n\
                  在席が確認できなくなった時点でワークステーションをロックします。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file to use instead of the default location
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the agent in the foreground
    Run(RunArgs),

    /// Run one authorization cycle and print the verdict (never locks)
    Check,

    /// Show subject and fingerprint of a daemon certificate
    Cert {
        /// PEM or DER certificate file
        path: PathBuf,
    },

    /// Update and save settings
    Configure(ConfigureArgs),

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ============================================================================
// Command Arguments
// ============================================================================

/// Arguments for the run command
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Start polling immediately
    #[arg(short, long)]
    pub activate: bool,
}

/// Arguments for the configure command
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigureArgs {
    /// Daemon host name or address
    #[arg(long, value_parser = validate_host)]
    pub host: Option<String>,

    /// Daemon port (1-65535)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Address the daemon certificate is pinned to
    #[arg(long, value_parser = validate_host)]
    pub pinned_host: Option<String>,

    /// Security level (1: proximity, 2: + OTP, 3: + OTP + HMAC)
    #[arg(short, long, value_parser = parse_level)]
    pub level: Option<SecurityLevel>,

    /// HMAC forwarded at security level 3
    #[arg(long)]
    pub hmac: Option<String>,

    /// Poll interval in seconds
    #[arg(
        short,
        long,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval: Option<u64>,

    /// Connect/read timeout in seconds
    #[arg(
        short,
        long,
        value_parser = clap::value_parser!(u64).range(1..=MAX_IO_TIMEOUT_SECS)
    )]
    pub timeout: Option<u64>,

    /// Pinned daemon certificate
    #[arg(long, value_name = "PATH")]
    pub cert: Option<PathBuf>,

    /// Activate as soon as `run` starts
    #[arg(long, conflicts_with = "no_silent")]
    pub silent: bool,

    /// Wait for activation when `run` starts
    #[arg(long)]
    pub no_silent: bool,
}

impl ConfigureArgs {
    /// Returns true if no option was given.
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.pinned_host.is_none()
            && self.level.is_none()
            && self.hmac.is_none()
            && self.interval.is_none()
            && self.timeout.is_none()
            && self.cert.is_none()
            && !self.silent
            && !self.no_silent
    }

    /// Applies the given options on top of `settings`.
    pub fn apply_to(&self, settings: &mut AgentSettings) {
        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(pinned) = &self.pinned_host {
            settings.pinned_host = Some(pinned.clone());
        }
        if let Some(level) = self.level {
            settings.security_level = level;
        }
        if let Some(hmac) = &self.hmac {
            settings.hmac = Some(hmac.clone()).filter(|h| !h.is_empty());
        }
        if let Some(interval) = self.interval {
            settings.poll_interval_seconds = interval;
        }
        if let Some(timeout) = self.timeout {
            settings.io_timeout_seconds = timeout;
        }
        if let Some(cert) = &self.cert {
            settings.cert_path = Some(cert.clone());
        }
        if self.silent {
            settings.start_silently = true;
        }
        if self.no_silent {
            settings.start_silently = false;
        }
    }
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Validates a host argument.
///
/// - Must not be empty
/// - Must not contain whitespace or URL delimiters
/// - Must not carry a port (`:` only inside an IPv6 literal)
fn validate_host(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("ホストは空にできません".to_string());
    }
    if s
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '@'))
    {
        return Err(format!("ホストに使用できない文字が含まれています: '{}'", s));
    }
    if !is_valid_host(s) {
        return Err(format!(
            "ホストにポートは含められません (--port を使用してください): '{}'",
            s
        ));
    }
    Ok(s.to_string())
}

fn parse_level(s: &str) -> Result<SecurityLevel, String> {
    let value: u8 = s
        .parse()
        .map_err(|_| format!("セキュリティレベルは数値で指定してください: '{}'", s))?;
    SecurityLevel::try_from(value)
}

// ============================================================================
// Tests
// ============================================================================
