//! Workstation lock via the platform's lock command.
//!
//! | Platform | Command |
//! |----------|---------|
//! | Windows  | `%windir%\System32\rundll32.exe user32.dll,LockWorkStation` |
//! | macOS    | `pmset displaysleepnow` |
//! | other    | `loginctl lock-session` |
//!
//! The command can be replaced through the `lockCommand` setting.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

use crate::error::{AgentError, Result};

/// Default time allowed for the lock command to finish.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

/// Runs an OS command that locks the interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemLockAction {
    program: String,
    args: Vec<String>,
    timeout_seconds: u64,
}

impl Default for SystemLockAction {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl SystemLockAction {
    /// The lock command for the current platform.
    #[must_use]
    pub fn platform_default() -> Self {
        let (program, args) = platform_command();
        Self {
            program,
            args,
            timeout_seconds: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }

    /// A lock action running `argv[0]` with the remaining arguments.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::InvalidConfig` if `argv` is empty or its
    /// program is blank.
    pub fn from_command(argv: Vec<String>) -> Result<Self> {
        let mut argv = argv.into_iter();
        let program = match argv.next() {
            Some(program) if !program.trim().is_empty() => program,
            _ => {
                return Err(AgentError::InvalidConfig(
                    "lock command must name a program".to_string(),
                ))
            }
        };

        Ok(Self {
            program,
            args: argv.collect(),
            timeout_seconds: DEFAULT_LOCK_TIMEOUT_SECS,
        })
    }

    /// Custom command if configured, otherwise the platform default.
    pub fn from_settings(lock_command: Option<Vec<String>>) -> Result<Self> {
        match lock_command {
            Some(argv) => Self::from_command(argv),
            None => Ok(Self::platform_default()),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The full command line, for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the lock command and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::LockAction` if the command cannot be spawned,
    /// exits unsuccessfully or does not finish in time.
    pub async fn run(&self) -> Result<()> {
        info!("Running lock command: {}", self.command_line());

        let finished = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::LockAction(format!("failed to start '{}': {}", self.program, e))
            })?
            .wait_with_output();

        let output = match timeout(Duration::from_secs(self.timeout_seconds), finished).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AgentError::LockAction(format!(
                    "'{}' did not complete: {}",
                    self.program, e
                )))
            }
            Err(_) => {
                error!("Lock command timed out after {}s", self.timeout_seconds);
                return Err(AgentError::LockAction(format!(
                    "'{}' timed out after {}s",
                    self.program, self.timeout_seconds
                )));
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AgentError::LockAction(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(target_os = "windows")]
fn platform_command() -> (String, Vec<String>) {
    let windir = std::env::var("windir").unwrap_or_else(|_| "C:\\Windows".to_string());
    (
        format!("{}\\System32\\rundll32.exe", windir),
        vec!["user32.dll,LockWorkStation".to_string()],
    )
}

#[cfg(target_os = "macos")]
fn platform_command() -> (String, Vec<String>) {
    ("pmset".to_string(), vec!["displaysleepnow".to_string()])
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn platform_command() -> (String, Vec<String>) {
    ("loginctl".to_string(), vec!["lock-session".to_string()])
}
