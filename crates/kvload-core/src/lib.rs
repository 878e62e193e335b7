//! Core domain types for kvload: configuration, keys, samples, metrics and thresholds.

pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod sample;
pub mod threshold;

pub use config::{
    arrival_period, default_thresholds, RunConfig, ThresholdSettings, MAX_RATE, MAX_WORKERS,
    MIN_RATE, SCENARIO_PING, SCENARIO_PUT_GET,
};
pub use error::{CoreError, CoreResult};
pub use key::WorkerId;
pub use metrics::{percentile, MetricsAggregator, ScenarioSummary};
pub use sample::{CheckResult, IterationOutcome, RequestSample, ScenarioName};
pub use threshold::{
    Aggregation, Comparison, MetricKind, MetricSelector, Predicate, RunResult, ThresholdOutcome,
    ThresholdSpec,
};
