//! Run configuration.
//!
//! Sources, lowest precedence first:
//! 1. Hardcoded defaults
//! 2. Config file passed on the command line or named by `KVLOAD_CONFIG`
//! 3. Environment variables (`BASE_URL`, `RATE_PING`, `DURATION`, ...)
//!
//! The loaded [`RunConfig`] is validated once and shared read-only for the
//! rest of the run.

use crate::error::{CoreError, CoreResult};
use crate::threshold::{
    Aggregation, Comparison, MetricKind, MetricSelector, Predicate, ThresholdSpec,
};
use config::{Config, Environment, File, Source};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Name of the health-probe scenario.
pub const SCENARIO_PING: &str = "ping";
/// Name of the write-then-read scenario.
pub const SCENARIO_PUT_GET: &str = "put_get";

/// Environment variable naming an optional config file.
pub const CONFIG_PATH_ENV: &str = "KVLOAD_CONFIG";

/// Highest arrival rate a scenario may request, per second.
pub const MAX_RATE: f64 = 10_000.0;
/// Lowest arrival rate a scenario may request: one arrival a day.
pub const MIN_RATE: f64 = 1.0 / 86_400.0;
/// Ceiling on any scenario's worker pool.
pub const MAX_WORKERS: usize = 10_000;

/// Settings taken verbatim from the environment. Parsing them would turn
/// `VALUE=007` into `"7"`.
const LITERAL_KEYS: &[&str] = &[
    "base_url",
    "key_prefix",
    "value",
    "duration",
    "grace_period",
    "request_timeout",
    "progress_interval",
    "abort_check_interval",
];

/// One threshold as written in a config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdSettings {
    pub metric: String,
    pub predicate: String,
    #[serde(default)]
    pub abort_on_fail: bool,
}

/// Flat, untyped view of every configuration source.
#[derive(Debug, Clone, Deserialize)]
struct RawSettings {
    base_url: String,
    key_prefix: String,
    value: String,
    ttl_ms: u64,
    rate_ping: f64,
    rate_putget: f64,
    duration: String,
    grace_period: String,
    settle_ms: u64,
    min_workers: usize,
    request_timeout: String,
    progress_interval: String,
    abort_check_interval: String,
    #[serde(default)]
    thresholds: Option<Vec<ThresholdSettings>>,
}

/// Typed, validated run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Target service root, e.g. `http://localhost:3000`.
    pub base_url: String,
    pub key_prefix: String,
    /// Payload written by `put_get`.
    pub value: String,
    /// Time-to-live sent with every write.
    pub ttl: Duration,
    /// Requests per second, keyed by scenario name.
    pub scenario_rates: BTreeMap<String, f64>,
    /// Total run length shared by all scenarios.
    pub duration: Duration,
    /// How long in-flight iterations may run past the deadline.
    pub grace_period: Duration,
    /// Idle time a worker stays occupied after each iteration.
    pub settle: Duration,
    /// Floor for every scenario's worker pool.
    pub min_workers: usize,
    pub request_timeout: Duration,
    pub progress_interval: Duration,
    pub abort_check_interval: Duration,
    pub thresholds: Vec<ThresholdSpec>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            key_prefix: "testkey".to_string(),
            value: "hola".to_string(),
            ttl: Duration::from_millis(100_000),
            scenario_rates: BTreeMap::from([
                (SCENARIO_PING.to_string(), 50.0),
                (SCENARIO_PUT_GET.to_string(), 25.0),
            ]),
            duration: Duration::from_secs(120),
            grace_period: Duration::from_secs(30),
            settle: Duration::from_millis(100),
            min_workers: 10,
            request_timeout: Duration::from_secs(10),
            progress_interval: Duration::from_secs(10),
            abort_check_interval: Duration::from_secs(1),
            thresholds: default_thresholds(),
        }
    }
}

/// Run-level thresholds applied when none are configured.
#[must_use]
pub fn default_thresholds() -> Vec<ThresholdSpec> {
    let threshold = |selector, aggregation, comparison, bound| ThresholdSpec {
        selector,
        predicate: Predicate::new(aggregation, comparison, bound),
        abort_on_fail: false,
    };

    vec![
        threshold(
            MetricSelector::global(MetricKind::HttpReqFailed),
            Aggregation::Rate,
            Comparison::Lt,
            0.01,
        ),
        threshold(
            MetricSelector::global(MetricKind::HttpReqDuration),
            Aggregation::Percentile(95.0),
            Comparison::Lt,
            500.0,
        ),
        threshold(
            MetricSelector::scenario(MetricKind::Checks, SCENARIO_PING),
            Aggregation::Rate,
            Comparison::Gt,
            0.99,
        ),
        threshold(
            MetricSelector::scenario(MetricKind::Checks, SCENARIO_PUT_GET),
            Aggregation::Rate,
            Comparison::Gt,
            0.98,
        ),
    ]
}

/// Time between two arrivals at `rate` per second.
///
/// Fails for rates outside `MIN_RATE..=MAX_RATE`, which the pacing clock
/// cannot represent.
pub fn arrival_period(rate: f64) -> CoreResult<Duration> {
    if !rate.is_finite() || !(MIN_RATE..=MAX_RATE).contains(&rate) {
        return Err(CoreError::validation(format!(
            "rate must be between {MIN_RATE} and {MAX_RATE} per second, got {rate}"
        )));
    }
    Duration::try_from_secs_f64(1.0 / rate)
        .map_err(|e| CoreError::validation(format!("rate {rate}: {e}")))
}

/// Environment source over `vars`, or over the process environment.
fn environment(vars: Option<&HashMap<String, String>>, try_parsing: bool) -> Environment {
    Environment::default()
        .try_parsing(try_parsing)
        .source(vars.cloned())
}

fn parse_duration(key: &str, raw: &str) -> CoreResult<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| CoreError::validation(format!("{key}: invalid duration `{raw}`: {e}")))
}

impl RunConfig {
    /// Load from defaults, an optional file, and the process environment.
    ///
    /// `path` takes precedence over `KVLOAD_CONFIG`.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let path = path.or(env_path.as_deref().map(Path::new));
        Self::load_with(path, None)
    }

    fn load_with(
        path: Option<&Path>,
        vars: Option<&HashMap<String, String>>,
    ) -> CoreResult<Self> {
        let mut builder = Config::builder()
            .set_default("base_url", "http://localhost:3000")?
            .set_default("key_prefix", "testkey")?
            .set_default("value", "hola")?
            .set_default("ttl_ms", 100_000)?
            .set_default("rate_ping", 50.0)?
            .set_default("rate_putget", 25.0)?
            .set_default("duration", "2m")?
            .set_default("grace_period", "30s")?
            .set_default("settle_ms", 100)?
            .set_default("min_workers", 10)?
            .set_default("request_timeout", "10s")?
            .set_default("progress_interval", "10s")?
            .set_default("abort_check_interval", "1s")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(environment(vars, true));
        let literal = environment(vars, false).collect()?;
        for key in LITERAL_KEYS {
            builder = builder.set_override_option(*key, literal.get(*key).cloned())?;
        }

        let raw: RawSettings = builder.build()?.try_deserialize()?;

        let config = Self::from_raw(raw)?;
        config.validate()?;

        tracing::debug!(
            base_url = %config.base_url,
            duration = ?config.duration,
            thresholds = config.thresholds.len(),
            "configuration loaded"
        );

        Ok(config)
    }

    fn from_raw(raw: RawSettings) -> CoreResult<Self> {
        let thresholds = match raw.thresholds {
            Some(settings) => settings
                .iter()
                .map(|t| {
                    ThresholdSpec::parse(&t.metric, &t.predicate)
                        .map(|spec| spec.with_abort_on_fail(t.abort_on_fail))
                })
                .collect::<CoreResult<Vec<_>>>()?,
            None => default_thresholds(),
        };

        Ok(Self {
            base_url: raw.base_url.trim().to_string(),
            key_prefix: raw.key_prefix,
            value: raw.value,
            ttl: Duration::from_millis(raw.ttl_ms),
            scenario_rates: BTreeMap::from([
                (SCENARIO_PING.to_string(), raw.rate_ping),
                (SCENARIO_PUT_GET.to_string(), raw.rate_putget),
            ]),
            duration: parse_duration("duration", &raw.duration)?,
            grace_period: parse_duration("grace_period", &raw.grace_period)?,
            settle: Duration::from_millis(raw.settle_ms),
            min_workers: raw.min_workers,
            request_timeout: parse_duration("request_timeout", &raw.request_timeout)?,
            progress_interval: parse_duration("progress_interval", &raw.progress_interval)?,
            abort_check_interval: parse_duration(
                "abort_check_interval",
                &raw.abort_check_interval,
            )?,
            thresholds,
        })
    }

    /// Reject values no run could honour.
    pub fn validate(&self) -> CoreResult<()> {
        let scheme_ok = ["http://", "https://"].iter().any(|scheme| {
            self.base_url
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
                && self.base_url.len() > scheme.len()
        });
        if !scheme_ok {
            return Err(CoreError::validation(format!(
                "base_url must be an http(s) URL, got `{}`",
                self.base_url
            )));
        }

        if self.key_prefix.is_empty() {
            return Err(CoreError::validation("key_prefix must not be empty"));
        }

        if self.scenario_rates.is_empty() {
            return Err(CoreError::validation("at least one scenario must be configured"));
        }
        for (scenario, rate) in &self.scenario_rates {
            if arrival_period(*rate).is_err() {
                return Err(CoreError::validation(format!(
                    "rate for scenario `{scenario}` must be between {MIN_RATE} and {MAX_RATE} \
                     per second, got {rate}"
                )));
            }
        }

        for (key, value) in [
            ("duration", self.duration),
            ("grace_period", self.grace_period),
            ("request_timeout", self.request_timeout),
            ("progress_interval", self.progress_interval),
            ("abort_check_interval", self.abort_check_interval),
        ] {
            if value.is_zero() {
                return Err(CoreError::validation(format!("{key} must be > 0")));
            }
        }

        if self.min_workers == 0 || self.min_workers > MAX_WORKERS {
            return Err(CoreError::validation(format!(
                "min_workers must be between 1 and {MAX_WORKERS}, got {}",
                self.min_workers
            )));
        }

        for spec in &self.thresholds {
            if !spec.selector.metric.supports(spec.predicate.aggregation) {
                return Err(CoreError::invalid_threshold(
                    spec.selector.to_string(),
                    spec.predicate.to_string(),
                    "aggregation not available for this metric",
                ));
            }
            if let Some(scenario) = &spec.selector.scenario {
                if !self.scenario_rates.contains_key(scenario) {
                    return Err(CoreError::invalid_threshold(
                        spec.selector.to_string(),
                        spec.predicate.to_string(),
                        format!("unknown scenario `{scenario}`"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Size of the worker pool for a scenario running at `rate` per second,
    /// capped at [`MAX_WORKERS`].
    #[must_use]
    pub fn workers_for(&self, rate: f64) -> usize {
        let needed = rate.ceil().clamp(1.0, MAX_WORKERS as f64) as usize;
        needed.max(self.min_workers).min(MAX_WORKERS)
    }

    /// Target rate for `scenario`, if it is configured.
    #[must_use]
    pub fn rate_of(&self, scenario: &str) -> Option<f64> {
        self.scenario_rates.get(scenario).copied()
    }
}
