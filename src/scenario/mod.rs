//! Scenario orchestration
//!
//! - [`context`] - shared settings and assertion helpers handed to every scenario
//! - [`catalog`] - the conformance scenarios
//! - [`fixture`] - ownership of the one broker process per suite
//! - [`runner`] - sequential execution with a liveness check before each scenario
//! - [`report`] - text and JSON suite reports

pub mod catalog;
pub mod context;
pub mod fixture;
pub mod report;
pub mod runner;

use crate::error::HarnessError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use catalog::catalog;
pub use context::{ExpectedMessage, ScenarioContext};
pub use fixture::SuiteFixture;
pub use report::{ScenarioResult, ScenarioStatus, SuiteReport};
pub use runner::SuiteRunner;

/// What a failed or timed-out wait was waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Connect,
    Subscription,
    Message,
    PublishAck,
    ConnectionClose,
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitKind::Connect => "CONNACK",
            WaitKind::Subscription => "SUBACK",
            WaitKind::Message => "message",
            WaitKind::PublishAck => "publish acknowledgment",
            WaitKind::ConnectionClose => "connection close",
        };
        f.write_str(name)
    }
}

/// Why a scenario failed, annotated with the adapter and wait involved
#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error("{adapter}: no {wait} within {elapsed:?}")]
    Timeout {
        adapter: String,
        wait: WaitKind,
        elapsed: Duration,
    },

    #[error("{adapter}: {wait} after {elapsed:?} did not match: {detail}")]
    Mismatch {
        adapter: String,
        wait: WaitKind,
        elapsed: Duration,
        detail: String,
    },

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl ScenarioFailure {
    pub fn timeout<S: Into<String>>(adapter: S, wait: WaitKind, elapsed: Duration) -> Self {
        Self::Timeout {
            adapter: adapter.into(),
            wait,
            elapsed,
        }
    }

    pub fn mismatch<S, D>(adapter: S, wait: WaitKind, elapsed: Duration, detail: D) -> Self
    where
        S: Into<String>,
        D: Into<String>,
    {
        Self::Mismatch {
            adapter: adapter.into(),
            wait,
            elapsed,
            detail: detail.into(),
        }
    }

    /// Adapter the failure is attributed to, if any
    pub fn adapter(&self) -> Option<&str> {
        match self {
            Self::Timeout { adapter, .. } | Self::Mismatch { adapter, .. } => Some(adapter),
            Self::Harness(_) => None,
        }
    }

    pub fn wait_kind(&self) -> Option<WaitKind> {
        match self {
            Self::Timeout { wait, .. } | Self::Mismatch { wait, .. } => Some(*wait),
            Self::Harness(_) => None,
        }
    }
}

/// One conformance scenario.
///
/// Scenarios build their own adapters from the context and never touch the
/// broker process. Adapters left connected on an early return are torn down
/// when dropped.
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Stable identifier used for filtering and reports
    fn name(&self) -> String;

    /// One-line statement of the property checked
    fn description(&self) -> String;

    async fn run(&self, ctx: &ScenarioContext) -> Result<(), ScenarioFailure>;
}
