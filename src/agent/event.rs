//! Events emitted by the polling controller.

use crate::error::AgentError;
use crate::types::Verdict;

/// Why a polling session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `deactivate` was called.
    Requested,
    /// The daemon did not confirm presence.
    Denied,
    /// The cycle failed before a verdict was reached.
    Failed(AgentError),
}

/// Polling controller events for display and external integrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Polling started
    Activated {
        /// Request URL polled each cycle
        url: String,
    },
    /// A poll cycle produced a verdict
    CycleCompleted {
        /// 1-based cycle number within the session
        cycle: u64,
        verdict: Verdict,
    },
    /// The lock action succeeded
    LockTriggered,
    /// The lock action failed
    LockFailed { error: AgentError },
    /// Polling stopped
    Deactivated { reason: StopReason },
}
