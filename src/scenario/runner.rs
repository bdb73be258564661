//! Sequential scenario execution

use super::context::ScenarioContext;
use super::fixture::SuiteFixture;
use super::report::{ScenarioResult, SuiteReport};
use super::Scenario;
use tokio::time::Instant;
use tracing::{error, info, Instrument};

const BROKER_GONE: &str = "broker not running";

/// Runs scenarios one at a time against the fixture's broker
pub struct SuiteRunner {
    context: ScenarioContext,
    filter: Option<String>,
}

impl SuiteRunner {
    pub fn new(context: ScenarioContext) -> Self {
        Self {
            context,
            filter: None,
        }
    }

    /// Only run scenarios whose name contains `filter`
    pub fn with_filter<S: Into<String>>(mut self, filter: Option<S>) -> Self {
        self.filter = filter.map(Into::into);
        self
    }

    pub fn context(&self) -> &ScenarioContext {
        &self.context
    }

    pub fn selects(&self, name: &str) -> bool {
        self.filter
            .as_deref()
            .map_or(true, |filter| name.contains(filter))
    }

    /// Run every selected scenario. Once the broker is found dead, the rest are skipped.
    pub async fn run(
        &self,
        fixture: &mut SuiteFixture,
        scenarios: &[Box<dyn Scenario>],
    ) -> SuiteReport {
        let mut report = SuiteReport::new(format!("mqtt://{}", self.context.endpoint().address()));
        let mut broker_alive = true;

        for scenario in scenarios.iter().filter(|s| self.selects(&s.name())) {
            let name = scenario.name();
            let description = scenario.description();

            if broker_alive && !fixture.is_broker_alive() {
                error!("Broker is gone, skipping remaining scenarios");
                broker_alive = false;
            }
            if !broker_alive {
                report.record(ScenarioResult::skipped(name, description, BROKER_GONE));
                continue;
            }

            let started = Instant::now();
            let span = crate::scenario_span!(name = %name);
            let outcome = scenario.run(&self.context).instrument(span).await;
            let elapsed = started.elapsed();

            let result = match outcome {
                Ok(()) => {
                    info!(scenario = %name, elapsed = ?elapsed, "Scenario passed");
                    ScenarioResult::passed(name, description, elapsed)
                }
                Err(failure) => {
                    error!(scenario = %name, elapsed = ?elapsed, "Scenario failed: {}", failure);
                    ScenarioResult::failed(name, description, elapsed, failure.to_string())
                }
            };
            report.record(result);

            tokio::time::sleep(self.context.timing().teardown_delay()).await;
        }

        report.finish();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::scenario::{ScenarioFailure, ScenarioStatus, WaitKind};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixed {
        name: &'static str,
        pass: bool,
    }

    #[async_trait]
    impl Scenario for Fixed {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn description(&self) -> String {
            format!("fixed outcome {}", self.pass)
        }

        async fn run(&self, _ctx: &ScenarioContext) -> Result<(), ScenarioFailure> {
            if self.pass {
                Ok(())
            } else {
                Err(ScenarioFailure::timeout(
                    "Fixed-Sub",
                    WaitKind::Message,
                    Duration::from_millis(5),
                ))
            }
        }
    }

    fn runner() -> SuiteRunner {
        let mut config = HarnessConfig::default();
        config.timing.teardown_delay_ms = 0;
        SuiteRunner::new(ScenarioContext::from_config(&config).unwrap())
    }

    fn scenarios() -> Vec<Box<dyn Scenario>> {
        vec![
            Box::new(Fixed {
                name: "alpha_ok",
                pass: true,
            }),
            Box::new(Fixed {
                name: "beta_fail",
                pass: false,
            }),
        ]
    }

    #[tokio::test]
    async fn test_run_records_each_outcome() {
        // Arrange
        let mut fixture = SuiteFixture::external();

        // Act
        let report = runner().run(&mut fixture, &scenarios()).await;

        // Assert
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].status, ScenarioStatus::Passed);
        assert_eq!(report.results[1].status, ScenarioStatus::Failed);
        assert!(report.results[1]
            .failure
            .as_deref()
            .unwrap()
            .contains("Fixed-Sub"));
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_filter_selects_by_substring() {
        let mut fixture = SuiteFixture::external();
        let runner = runner().with_filter(Some("beta"));

        let report = runner.run(&mut fixture, &scenarios()).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].name, "beta_fail");
    }

    #[tokio::test]
    async fn test_dead_broker_skips_everything() {
        // A supervised fixture that was never started has no live broker
        let mut fixture = SuiteFixture::supervised(&HarnessConfig::default());

        let report = runner().run(&mut fixture, &scenarios()).await;

        assert_eq!(report.skipped(), 2);
        assert!(!report.is_success());
    }
}
