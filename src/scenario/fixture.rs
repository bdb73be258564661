//! The one broker a suite runs against
//!
//! Scenarios never start or stop the broker; only the fixture does, once per
//! suite. An external fixture assumes a broker someone else manages.

use crate::config::HarnessConfig;
use crate::error::HarnessResult;
use crate::process::{ProcessSupervisor, SupervisorState};
use tracing::{info, warn};

/// Broker ownership for one suite run
pub enum SuiteFixture {
    /// Broker launched and stopped by this process
    Supervised(ProcessSupervisor),
    /// Broker already running elsewhere
    External,
}

impl SuiteFixture {
    pub fn supervised(config: &HarnessConfig) -> Self {
        Self::Supervised(ProcessSupervisor::from_config("broker-under-test", &config.broker))
    }

    pub fn external() -> Self {
        Self::External
    }

    /// Launch the broker if this fixture owns one
    pub async fn start(&mut self) -> HarnessResult<()> {
        match self {
            Self::Supervised(supervisor) => {
                if supervisor.is_started() {
                    return Ok(());
                }
                info!(
                    executable = %supervisor.command().executable.display(),
                    "Starting broker for suite"
                );
                supervisor.start().await
            }
            Self::External => {
                info!("Using externally managed broker");
                Ok(())
            }
        }
    }

    /// Whether scenarios can still run. An external broker is assumed alive.
    pub fn is_broker_alive(&mut self) -> bool {
        match self {
            Self::Supervised(supervisor) => {
                let alive = supervisor.is_started();
                if !alive {
                    warn!(state = ?supervisor.state(), "Supervised broker is not running");
                }
                alive
            }
            Self::External => true,
        }
    }

    /// Stop the broker if this fixture owns one; safe to call more than once
    pub async fn stop(&mut self) -> HarnessResult<()> {
        match self {
            Self::Supervised(supervisor) => {
                if *supervisor.state() == SupervisorState::Stopped {
                    return Ok(());
                }
                supervisor.stop().await
            }
            Self::External => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_fixture_is_always_alive() {
        let mut fixture = SuiteFixture::external();
        fixture.start().await.unwrap();
        assert!(fixture.is_broker_alive());
        fixture.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unstarted_supervised_fixture() {
        let mut fixture = SuiteFixture::supervised(&HarnessConfig::default());
        assert!(!fixture.is_broker_alive());

        fixture.stop().await.unwrap();
        fixture.stop().await.unwrap();
    }
}
