//! Bounded retry of failed tests

use serde::{Deserialize, Serialize};

use crate::lifecycle::TestOutcome;

/// Default number of retries per test method.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Retry bookkeeping for one registered test method.
///
/// Lives for the whole run; retries do not reset it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    attempts: u32,
    max_retries: u32,
}

impl RetryState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
        }
    }

    /// Retries granted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Decide whether a finished attempt should run again.
///
/// Only failures are retried, and only while the bound allows. A `true` answer
/// consumes one retry from `state`.
pub fn should_retry(outcome: &TestOutcome, state: &mut RetryState) -> bool {
    if !outcome.is_failed() || state.exhausted() {
        return false;
    }
    state.attempts += 1;
    true
}
