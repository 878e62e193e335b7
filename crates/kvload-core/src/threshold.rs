//! Threshold grammar and run verdicts.
//!
//! A threshold pairs a metric selector with a predicate:
//!
//! ```text
//! http_req_failed               rate<0.01
//! http_req_duration             p(95)<500
//! checks{scenario:ping}         rate>0.99
//! dropped_iterations            count<1
//! ```
//!
//! Thresholds are parsed and checked against their metric when the run
//! configuration is loaded, so evaluation itself cannot fail.

use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use std::fmt;

/// Metrics the aggregator can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Ratio of passed checks.
    Checks,
    /// Ratio of failed requests.
    HttpReqFailed,
    /// Request durations in milliseconds.
    HttpReqDuration,
    /// Number of requests.
    HttpReqs,
    /// Number of completed iterations.
    Iterations,
    /// Number of arrivals that found no free worker.
    DroppedIterations,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        Self::Checks,
        Self::HttpReqFailed,
        Self::HttpReqDuration,
        Self::HttpReqs,
        Self::Iterations,
        Self::DroppedIterations,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Checks => "checks",
            Self::HttpReqFailed => "http_req_failed",
            Self::HttpReqDuration => "http_req_duration",
            Self::HttpReqs => "http_reqs",
            Self::Iterations => "iterations",
            Self::DroppedIterations => "dropped_iterations",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether `aggregation` is meaningful for this metric.
    #[must_use]
    pub fn supports(self, aggregation: Aggregation) -> bool {
        match self {
            Self::Checks | Self::HttpReqFailed => matches!(aggregation, Aggregation::Rate),
            Self::HttpReqDuration => matches!(
                aggregation,
                Aggregation::Percentile(_)
                    | Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
            ),
            Self::HttpReqs | Self::Iterations | Self::DroppedIterations => {
                matches!(aggregation, Aggregation::Count)
            }
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metric name plus optional scenario tag, e.g. `checks{scenario:ping}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricSelector {
    pub metric: MetricKind,
    /// `None` selects samples of every scenario.
    pub scenario: Option<String>,
}

impl MetricSelector {
    #[must_use]
    pub fn global(metric: MetricKind) -> Self {
        Self {
            metric,
            scenario: None,
        }
    }

    #[must_use]
    pub fn scenario(metric: MetricKind, scenario: impl Into<String>) -> Self {
        Self {
            metric,
            scenario: Some(scenario.into()),
        }
    }

    /// Parse `name` or `name{scenario:value}`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (name, tags) = match raw.find('{') {
            Some(open) => {
                let tags = raw[open + 1..]
                    .strip_suffix('}')
                    .ok_or_else(|| "unterminated tag block".to_string())?;
                (raw[..open].trim(), Some(tags))
            }
            None => (raw, None),
        };

        let metric =
            MetricKind::from_name(name).ok_or_else(|| format!("unknown metric `{name}`"))?;

        let scenario = match tags {
            None => None,
            Some(tags) => {
                let (key, value) = tags
                    .split_once(':')
                    .ok_or_else(|| format!("tag `{tags}` must be `key:value`"))?;
                let (key, value) = (key.trim(), value.trim());
                if key != "scenario" {
                    return Err(format!("unsupported tag `{key}` (only `scenario`)"));
                }
                if value.is_empty() {
                    return Err("empty scenario tag".to_string());
                }
                Some(value.to_string())
            }
        };

        Ok(Self { metric, scenario })
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scenario {
            Some(scenario) => write!(f, "{}{{scenario:{}}}", self.metric, scenario),
            None => write!(f, "{}", self.metric),
        }
    }
}

/// How a metric is reduced to a single number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    /// Percentile in `[0, 100]`.
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
}

impl Aggregation {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "rate" => Ok(Self::Rate),
            "count" => Ok(Self::Count),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "med" => Ok(Self::Med),
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation `{other}`"))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| format!("invalid percentile `{inner}`"))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {p} outside [0, 100]"));
                }
                Ok(Self::Percentile(p))
            }
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => f.write_str("rate"),
            Self::Count => f.write_str("count"),
            Self::Percentile(p) => write!(f, "p({p})"),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    // Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Comparison); 5] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
        }
    }
}

/// `<aggregation><op><bound>`, e.g. `p(95)<500`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub bound: f64,
}

impl Predicate {
    #[must_use]
    pub fn new(aggregation: Aggregation, comparison: Comparison, bound: f64) -> Self {
        Self {
            aggregation,
            comparison,
            bound,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let op_at = compact
            .find(['<', '>', '='])
            .ok_or_else(|| "missing comparison operator".to_string())?;
        let (lhs, rest) = compact.split_at(op_at);

        let (token, comparison) = Comparison::TOKENS
            .into_iter()
            .find(|(token, _)| rest.starts_with(token))
            .ok_or_else(|| format!("unsupported operator in `{rest}`"))?;

        let rhs = &rest[token.len()..];
        let bound: f64 = rhs
            .parse()
            .map_err(|_| format!("invalid bound `{rhs}`"))?;
        if !bound.is_finite() {
            return Err(format!("bound `{rhs}` is not finite"));
        }

        Ok(Self {
            aggregation: Aggregation::parse(lhs)?,
            comparison,
            bound,
        })
    }

    /// Whether the observed value satisfies the predicate.
    #[must_use]
    pub fn holds(&self, observed: f64) -> bool {
        match self.comparison {
            Comparison::Lt => observed < self.bound,
            Comparison::Le => observed <= self.bound,
            Comparison::Gt => observed > self.bound,
            Comparison::Ge => observed >= self.bound,
            Comparison::Eq => observed == self.bound,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.symbol(),
            self.bound
        )
    }
}

/// A pass/fail assertion over one aggregated metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub selector: MetricSelector,
    pub predicate: Predicate,
    /// Stop the run as soon as this threshold fails mid-run.
    pub abort_on_fail: bool,
}

impl ThresholdSpec {
    /// Build from typed parts, rejecting aggregations the metric does not support.
    pub fn new(selector: MetricSelector, predicate: Predicate) -> CoreResult<Self> {
        if !selector.metric.supports(predicate.aggregation) {
            return Err(CoreError::invalid_threshold(
                selector.to_string(),
                predicate.to_string(),
                format!(
                    "aggregation `{}` is not available for metric `{}`",
                    predicate.aggregation, selector.metric
                ),
            ));
        }

        Ok(Self {
            selector,
            predicate,
            abort_on_fail: false,
        })
    }

    /// Parse a selector/predicate pair as written in configuration.
    pub fn parse(selector: &str, predicate: &str) -> CoreResult<Self> {
        let invalid = |reason: String| CoreError::invalid_threshold(selector, predicate, reason);

        let parsed_selector = MetricSelector::parse(selector).map_err(invalid)?;
        let parsed_predicate = Predicate::parse(predicate).map_err(invalid)?;
        Self::new(parsed_selector, parsed_predicate)
    }

    #[must_use]
    pub fn with_abort_on_fail(mut self, abort_on_fail: bool) -> Self {
        self.abort_on_fail = abort_on_fail;
        self
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.selector, self.predicate)
    }
}

/// Verdict for a single threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub predicate: String,
    /// `None` when the metric had no samples in scope.
    pub observed: Option<f64>,
    pub passed: bool,
}

impl ThresholdOutcome {
    /// Judge `spec` against an observed value. No data never passes.
    #[must_use]
    pub fn judge(spec: &ThresholdSpec, observed: Option<f64>) -> Self {
        Self {
            metric: spec.selector.to_string(),
            predicate: spec.predicate.to_string(),
            observed,
            passed: observed.is_some_and(|value| spec.predicate.holds(value)),
        }
    }
}

/// Terminal verdict of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub thresholds: Vec<ThresholdOutcome>,
    pub overall_passed: bool,
    /// Why the run stopped before its deadline, if it did.
    pub aborted: Option<String>,
}

impl RunResult {
    #[must_use]
    pub fn new(thresholds: Vec<ThresholdOutcome>) -> Self {
        let overall_passed = thresholds.iter().all(|outcome| outcome.passed);
        Self {
            thresholds,
            overall_passed,
            aborted: None,
        }
    }

    /// Mark the run as stopped early. An aborted run never passes.
    #[must_use]
    pub fn with_abort(mut self, reason: Option<String>) -> Self {
        if reason.is_some() {
            self.overall_passed = false;
        }
        self.aborted = reason;
        self
    }

    #[must_use]
    pub fn failed_thresholds(&self) -> Vec<&ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed).collect()
    }
}
