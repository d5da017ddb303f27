//! The Retry Controller (C6): the broker's subsystem that maps a failure
//! event plus a step's retry configuration to a retry decision.

mod retry;

pub use retry::{FailureOutcome, RetryController, RetryDecision};
