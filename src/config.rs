//! Harness configuration
//!
//! Configuration is read once at suite startup. Every field has a default so an
//! empty TOML file (or none at all) yields a usable setup: the broker binary is
//! resolved from the build identifier, and the broker is expected on
//! `mqtt://127.0.0.1:1883`.
//!
//! ```toml
//! [broker]
//! build = "release"
//! connect_timeout_ms = 2000
//!
//! [network]
//! broker_url = "mqtt://127.0.0.1:1883"
//!
//! [timing]
//! wait_timeout_ms = 2000
//! settle_delay_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the build/deployment identifier
pub const BUILD_ENV: &str = "CONFIG";
/// Environment variable overriding the broker URL
pub const BROKER_URL_ENV: &str = "BROKER_ITEST_URL";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warning", "error", "fatal"];

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub timing: TimingSection,
}

/// How to launch the broker-under-test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Build/deployment identifier; selects executable and log directory
    #[serde(default = "default_build")]
    pub build: String,
    /// Project root the `target/` tree lives under
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Broker executable file name
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Log level passed via `--log-level`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Connect timeout passed via `--conn-timeout`
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Add `--log-console`
    #[serde(default)]
    pub log_console: bool,
    /// Time the broker gets to come up before the liveness check
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Time between SIGTERM and SIGKILL
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Where the broker listens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
}

/// Wait windows and settle delays used by scenarios
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    /// Upper bound for every mailbox wait
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Pause used where the protocol offers no acknowledgment
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Pause after each scenario so the broker can reap its sessions
    #[serde(default = "default_teardown_delay_ms")]
    pub teardown_delay_ms: u64,
    /// By when the keep-alive probe must have been dropped (after 1.5x its 1 s keep-alive)
    #[serde(default = "default_keep_alive_expiry_ms")]
    pub keep_alive_expiry_ms: u64,
    /// By when a CONNECT-less socket must have been dropped
    #[serde(default = "default_connect_expiry_ms")]
    pub connect_expiry_ms: u64,
    /// How long before a broker timer is due the connection must still be open
    #[serde(default = "default_timer_margin_ms")]
    pub timer_margin_ms: u64,
}

fn default_build() -> String {
    "debug".to_string()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_binary() -> String {
    "wally-iod".to_string()
}

fn default_log_level() -> String {
    "trace".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_startup_grace_ms() -> u64 {
    2000
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

fn default_broker_url() -> String {
    "mqtt://127.0.0.1:1883".to_string()
}

fn default_wait_timeout_ms() -> u64 {
    2000
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_teardown_delay_ms() -> u64 {
    1000
}

fn default_keep_alive_expiry_ms() -> u64 {
    2000
}

fn default_connect_expiry_ms() -> u64 {
    3000
}

fn default_timer_margin_ms() -> u64 {
    500
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            build: default_build(),
            root_dir: default_root_dir(),
            binary: default_binary(),
            log_level: default_log_level(),
            connect_timeout_ms: default_connect_timeout_ms(),
            log_console: false,
            startup_grace_ms: default_startup_grace_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            teardown_delay_ms: default_teardown_delay_ms(),
            keep_alive_expiry_ms: default_keep_alive_expiry_ms(),
            connect_expiry_ms: default_connect_expiry_ms(),
            timer_margin_ms: default_timer_margin_ms(),
        }
    }
}

impl BrokerSection {
    /// `<root>/target/<build>/main/<binary>`
    pub fn executable(&self) -> PathBuf {
        self.root_dir
            .join("target")
            .join(&self.build)
            .join("main")
            .join(&self.binary)
    }

    /// `<root>/target/<build>/itest/itest_server.log`
    pub fn log_file(&self) -> PathBuf {
        self.root_dir
            .join("target")
            .join(&self.build)
            .join("itest")
            .join("itest_server.log")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl TimingSection {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn teardown_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_delay_ms)
    }

    pub fn keep_alive_expiry(&self) -> Duration {
        Duration::from_millis(self.keep_alive_expiry_ms)
    }

    pub fn connect_expiry(&self) -> Duration {
        Duration::from_millis(self.connect_expiry_ms)
    }

    pub fn timer_margin(&self) -> Duration {
        Duration::from_millis(self.timer_margin_ms)
    }
}

/// When the broker must drop the silent keep-alive probe: 1.5x its announced keep-alive
pub fn keep_alive_grace() -> Duration {
    Duration::from_millis(u64::from(crate::probe::frame::KEEP_ALIVE_SECS) * 1500)
}

/// Host and port of the broker's MQTT listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    /// `host:port`, suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl NetworkSection {
    /// Parse the broker URL; only plain `mqtt://` is supported
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        let url = Url::parse(&self.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;

        if url.scheme() != "mqtt" {
            return Err(ConfigError::InvalidBrokerUrl(self.broker_url.clone()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;

        Ok(BrokerEndpoint {
            host: host.to_string(),
            port: url.port().unwrap_or(1883),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarnessConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: HarnessConfig = toml::from_str(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = HarnessConfig::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(build) = lookup(BUILD_ENV).filter(|b| !b.is_empty()) {
            self.broker.build = build;
        }
        if let Some(url) = lookup(BROKER_URL_ENV).filter(|u| !u.is_empty()) {
            self.network.broker_url = url;
        }
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.build.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.build must not be empty".to_string(),
            ));
        }

        if self.broker.binary.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.binary must not be empty".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.broker.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.log_level '{}' must be one of {}",
                self.broker.log_level,
                LOG_LEVELS.join("|")
            )));
        }

        if self.timing.wait_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "timing.wait_timeout_ms must be positive".to_string(),
            ));
        }

        if self.timing.connect_expiry_ms <= self.broker.connect_timeout_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "timing.connect_expiry_ms ({}) must exceed broker.connect_timeout_ms ({})",
                self.timing.connect_expiry_ms, self.broker.connect_timeout_ms
            )));
        }

        let keep_alive_grace_ms = keep_alive_grace().as_millis();
        if u128::from(self.timing.keep_alive_expiry_ms) <= keep_alive_grace_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "timing.keep_alive_expiry_ms ({}) must exceed the keep-alive grace ({} ms)",
                self.timing.keep_alive_expiry_ms, keep_alive_grace_ms
            )));
        }

        if u128::from(self.timing.timer_margin_ms) >= keep_alive_grace_ms
            || self.timing.timer_margin_ms >= self.broker.connect_timeout_ms
        {
            return Err(ConfigError::InvalidConfig(format!(
                "timing.timer_margin_ms ({}) must be below the keep-alive grace ({} ms) and broker.connect_timeout_ms ({})",
                self.timing.timer_margin_ms, keep_alive_grace_ms, self.broker.connect_timeout_ms
            )));
        }

        self.network.endpoint()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.broker.build, "debug");
        assert_eq!(config.broker.connect_timeout_ms, 2000);
        assert_eq!(config.timing.wait_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[broker]
build = "release"
root_dir = "/opt/broker"
binary = "mybroker"
log_level = "debug"
connect_timeout_ms = 500
log_console = true
startup_grace_ms = 100
shutdown_grace_ms = 50

[network]
broker_url = "mqtt://10.0.0.5:1884"

[timing]
wait_timeout_ms = 3000
settle_delay_ms = 250
teardown_delay_ms = 0
keep_alive_expiry_ms = 1600
connect_expiry_ms = 900
timer_margin_ms = 200
"#;

        let config: HarnessConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.broker.build, "release");
        assert!(config.broker.log_console);
        assert_eq!(
            config.broker.executable(),
            PathBuf::from("/opt/broker/target/release/main/mybroker")
        );
        assert_eq!(
            config.broker.log_file(),
            PathBuf::from("/opt/broker/target/release/itest/itest_server.log")
        );
        assert_eq!(config.timing.settle_delay(), Duration::from_millis(250));
        assert_eq!(config.timing.keep_alive_expiry(), Duration::from_millis(1600));
        assert_eq!(config.timing.timer_margin(), Duration::from_millis(200));
        assert!(config.validate().is_ok());

        let endpoint = config.network.endpoint().unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, 1884);
        assert_eq!(endpoint.address(), "10.0.0.5:1884");
    }

    #[test]
    fn test_timer_margin_must_leave_an_open_window() {
        let mut config = HarnessConfig::default();
        assert_eq!(keep_alive_grace(), Duration::from_millis(1500));

        config.timing.timer_margin_ms = 1500;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        config.timing.timer_margin_ms = 300;
        config.broker.connect_timeout_ms = 300;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));

        config.broker.connect_timeout_ms = 2000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keep_alive_expiry_must_follow_grace() {
        let mut config = HarnessConfig::default();
        config.timing.keep_alive_expiry_ms = 1500;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_endpoint_default_port() {
        let network = NetworkSection {
            broker_url: "mqtt://localhost".to_string(),
        };
        assert_eq!(network.endpoint().unwrap().port, 1883);
    }

    #[test]
    fn test_invalid_broker_urls() {
        for url in ["not a url", "mqtts://localhost:8883", "http://localhost"] {
            let network = NetworkSection {
                broker_url: url.to_string(),
            };
            assert!(
                matches!(network.endpoint(), Err(ConfigError::InvalidBrokerUrl(_))),
                "Expected {url} to be rejected"
            );
        }
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (BUILD_ENV, "sanitize"),
            (BROKER_URL_ENV, "mqtt://127.0.0.1:2883"),
        ]
        .into_iter()
        .collect();

        let mut config = HarnessConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.broker.build, "sanitize");
        assert_eq!(config.network.endpoint().unwrap().port, 2883);
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let mut config = HarnessConfig::default();
        config.apply_overrides(|_| Some(String::new()));
        assert_eq!(config.broker.build, "debug");
        assert_eq!(config.network.broker_url, "mqtt://127.0.0.1:1883");
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = HarnessConfig::default();
        config.broker.log_level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_build() {
        let mut config = HarnessConfig::default();
        config.broker.build = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("itest.toml");
        std::fs::write(&path, "[timing]\nsettle_delay_ms = 10\n").unwrap();

        let config = HarnessConfig::load_from_file(&path).unwrap();
        assert_eq!(config.timing.settle_delay_ms, 10);
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = HarnessConfig::load_from_file(Path::new("/nonexistent/itest.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }
}
