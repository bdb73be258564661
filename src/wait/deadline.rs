//! Per-operation deadlines
//!
//! A [`Deadline`] is a plain value: it bounds exactly the future handed to
//! [`Deadline::run`] and nothing else. There is no process-wide alarm to arm or
//! disarm, so leaving a scope early cannot leave a timer behind, and any number
//! of deadlines may be live at once.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// The bounded operation did not finish before its deadline
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Deadline of {0:?} elapsed")]
pub struct DeadlineElapsed(pub Duration);

/// A point in time after which a bounded operation is abandoned
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// The duration this deadline was created with
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left, zero once elapsed
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Drive `operation` until it completes or the deadline passes.
    ///
    /// On expiry the operation is dropped; for socket reads this cancels the
    /// read without consuming any bytes.
    pub async fn run<F>(&self, operation: F) -> Result<F::Output, DeadlineElapsed>
    where
        F: Future,
    {
        tokio::time::timeout_at(self.at, operation)
            .await
            .map_err(|_| DeadlineElapsed(self.budget))
    }
}
