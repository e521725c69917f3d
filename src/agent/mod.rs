//! Presence polling.
//!
//! [`PollingController`] runs the activate/poll/lock cycle and reports
//! progress as [`PollEvent`]s.

pub mod controller;
pub mod event;

pub use controller::PollingController;
pub use event::{PollEvent, StopReason};
