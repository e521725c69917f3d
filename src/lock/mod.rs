//! Workstation lock invoked when presence is not confirmed.
//!
//! [`LockAction`] is the seam the polling controller calls through.
//! [`SystemLockAction`] runs the platform lock command and
//! [`MockLockAction`] records calls for tests.

pub mod command;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{AgentError, Result};

pub use command::{SystemLockAction, DEFAULT_LOCK_TIMEOUT_SECS};

pub trait LockAction: Send + Sync + 'static {
    /// Locks the interactive session.
    fn lock(&self) -> impl Future<Output = Result<()>> + Send;
}

impl LockAction for SystemLockAction {
    fn lock(&self) -> impl Future<Output = Result<()>> + Send {
        self.run()
    }
}

#[derive(Debug, Default)]
pub struct MockLockAction {
    calls: AtomicUsize,
    should_fail: AtomicBool,
}

impl MockLockAction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Number of lock attempts, failed ones included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LockAction for MockLockAction {
    fn lock(&self) -> impl Future<Output = Result<()>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.should_fail.load(Ordering::SeqCst);
        async move {
            if fail {
                Err(AgentError::LockAction("simulated failure".to_string()))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let mock = MockLockAction::new();
        assert_eq!(mock.call_count(), 0);

        mock.lock().await.unwrap();
        mock.lock().await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_failure_still_counts() {
        let mock = MockLockAction::new();
        mock.set_should_fail(true);

        let result = mock.lock().await;
        assert!(matches!(result, Err(AgentError::LockAction(_))));
        assert_eq!(mock.call_count(), 1);
    }
}
