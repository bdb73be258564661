//! Suite results as text and JSON

use crate::error::HarnessResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    /// Not run because the broker was gone
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub description: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ScenarioResult {
    pub fn passed(name: String, description: String, duration: Duration) -> Self {
        Self {
            name,
            description,
            status: ScenarioStatus::Passed,
            duration_ms: duration_millis(duration),
            failure: None,
        }
    }

    pub fn failed(name: String, description: String, duration: Duration, failure: String) -> Self {
        Self {
            name,
            description,
            status: ScenarioStatus::Failed,
            duration_ms: duration_millis(duration),
            failure: Some(failure),
        }
    }

    pub fn skipped(name: String, description: String, reason: &str) -> Self {
        Self {
            name,
            description,
            status: ScenarioStatus::Skipped,
            duration_ms: 0,
            failure: Some(reason.to_string()),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Outcome of one suite run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub broker_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<ScenarioResult>,
}

impl SuiteReport {
    pub fn new<S: Into<String>>(broker_url: S) -> Self {
        Self {
            broker_url: broker_url.into(),
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: ScenarioResult) {
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    fn count(&self, status: ScenarioStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(ScenarioStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(ScenarioStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(ScenarioStatus::Skipped)
    }

    /// True when every scenario ran and passed
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Broker: {}", self.broker_url);
        for result in &self.results {
            let marker = match result.status {
                ScenarioStatus::Passed => "ok",
                ScenarioStatus::Failed => "FAILED",
                ScenarioStatus::Skipped => "skipped",
            };
            let _ = writeln!(
                out,
                "  {:<34} {:>7} ({} ms)",
                result.name, marker, result.duration_ms
            );
            if let Some(failure) = &result.failure {
                let _ = writeln!(out, "      {failure}");
            }
        }
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        );
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        let json = self.to_json().map_err(std::io::Error::from)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
