//! Raw observations produced by scenario iterations.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Shared scenario name, cloned into every record.
pub type ScenarioName = Arc<str>;

/// Outcome of one boolean assertion made during an iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub scenario: ScenarioName,
    pub name: String,
    pub passed: bool,
    pub observed_at: DateTime<Utc>,
}

impl CheckResult {
    /// Record a check observed now.
    pub fn new(scenario: &ScenarioName, name: impl Into<String>, passed: bool) -> Self {
        Self {
            scenario: Arc::clone(scenario),
            name: name.into(),
            passed,
            observed_at: Utc::now(),
        }
    }
}

/// Timing and outcome of one outbound HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSample {
    pub scenario: ScenarioName,
    /// Request label, e.g. `"GET /ping"`.
    pub name: &'static str,
    pub duration: Duration,
    /// Transport error or unexpected status.
    pub failed: bool,
    /// HTTP status, absent on transport errors.
    pub status: Option<u16>,
}

impl RequestSample {
    /// Duration in fractional milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_nanos() as f64 / 1_000_000.0
    }
}

/// Everything one completed iteration reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationOutcome {
    pub checks: Vec<CheckResult>,
    pub samples: Vec<RequestSample>,
}

impl IterationOutcome {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_check(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    pub fn push_sample(&mut self, sample: RequestSample) {
        self.samples.push(sample);
    }
}
