//! Integration test harness for an external MQTT 3.1.1 broker
//!
//! The harness launches the broker-under-test as a child process, drives it
//! with real client connections and a minimal raw-socket probe, and checks
//! delivery, QoS, retained-message, last-will and connection-timer behavior.
//!
//! # Overview
//!
//! - [`wait`] - single-slot mailboxes and explicit deadlines
//! - [`process`] - broker process supervision
//! - [`probe`] - hand-encoded CONNECT/CONNACK over a bare TCP stream
//! - [`transport::mqtt`] - connector, subscriber and publisher adapters
//! - [`scenario`] - fixture, scenario catalog, runner and reports
//! - [`loadtest`] - publishers and subscribers under sustained traffic
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use broker_itest::config::HarnessConfig;
//! use broker_itest::scenario::{catalog, ScenarioContext, SuiteFixture, SuiteRunner};
//!
//! # tokio_test::block_on(async {
//! let config = HarnessConfig::from_env()?;
//! let mut fixture = SuiteFixture::supervised(&config);
//! fixture.start().await?;
//!
//! let runner = SuiteRunner::new(ScenarioContext::from_config(&config)?);
//! let report = runner.run(&mut fixture, &catalog()).await;
//! fixture.stop().await?;
//!
//! println!("{}", report.render_text());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod loadtest;
pub mod observability;
pub mod probe;
pub mod process;
pub mod scenario;
pub mod transport;
pub mod wait;

pub use config::{BrokerEndpoint, HarnessConfig};
pub use error::{HarnessError, HarnessResult};
pub use scenario::{Scenario, ScenarioFailure};
