//! Run-wide metric aggregation.
//!
//! Workers of every scenario feed one [`MetricsAggregator`]. Counts and rates
//! come from per-scenario tallies updated on every record, so reading them
//! while the run is live costs one step per scenario. Request durations are
//! kept raw so percentiles are exact; they are copied out under the lock and
//! sorted after it is released.

use crate::sample::{CheckResult, IterationOutcome, RequestSample, ScenarioName};
use crate::threshold::{
    Aggregation, MetricKind, MetricSelector, RunResult, ThresholdOutcome, ThresholdSpec,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Running counters for one scenario.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    iterations: u64,
    dropped: u64,
    requests: u64,
    failed_requests: u64,
    checks_passed: u64,
    checks_total: u64,
}

#[derive(Debug, Default)]
struct Samples {
    tallies: BTreeMap<ScenarioName, Tally>,
    /// Request durations in milliseconds, in arrival order.
    durations: BTreeMap<ScenarioName, Vec<f64>>,
}

impl Samples {
    fn tally(&mut self, scenario: &ScenarioName) -> &mut Tally {
        self.tallies.entry(Arc::clone(scenario)).or_default()
    }

    fn add_check(&mut self, check: &CheckResult) {
        let tally = self.tally(&check.scenario);
        tally.checks_total += 1;
        tally.checks_passed += u64::from(check.passed);
    }

    fn add_sample(&mut self, sample: &RequestSample) {
        let tally = self.tally(&sample.scenario);
        tally.requests += 1;
        tally.failed_requests += u64::from(sample.failed);
        self.durations
            .entry(Arc::clone(&sample.scenario))
            .or_default()
            .push(sample.duration_ms());
    }

    /// Sum of one tally field over the scenarios in scope.
    fn sum(&self, scope: Option<&str>, field: impl Fn(&Tally) -> u64) -> u64 {
        self.tallies
            .iter()
            .filter(|(scenario, _)| in_scope(scenario, scope))
            .map(|(_, tally)| field(tally))
            .sum()
    }
}

fn in_scope(scenario: &str, scope: Option<&str>) -> bool {
    scope.map_or(true, |wanted| wanted == scenario)
}

fn ratio(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}

/// Percentile of an ascending slice using linear interpolation between
/// closest ranks (`rank = p / 100 * (n - 1)`).
///
/// Returns `None` for an empty slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Per-scenario counters for progress lines and reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub requests: u64,
    pub failed_requests: u64,
    pub checks_passed: u64,
    pub checks_total: u64,
    pub p95_ms: Option<f64>,
}

impl ScenarioSummary {
    #[must_use]
    pub fn check_pass_rate(&self) -> Option<f64> {
        ratio(self.checks_passed, self.checks_total)
    }
}

/// Thread-safe sink for checks, request samples, and iteration counters.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<Samples>,
}

impl MetricsAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record a completed iteration and everything it observed.
    pub fn record_iteration(&self, scenario: &ScenarioName, outcome: IterationOutcome) {
        let mut inner = self.inner.lock();
        inner.tally(scenario).iterations += 1;
        for check in &outcome.checks {
            inner.add_check(check);
        }
        for sample in &outcome.samples {
            inner.add_sample(sample);
        }
    }

    pub fn record_check(&self, check: CheckResult) {
        self.inner.lock().add_check(&check);
    }

    pub fn record_sample(&self, sample: RequestSample) {
        self.inner.lock().add_sample(&sample);
    }

    /// Count an arrival that found no free worker.
    pub fn record_dropped(&self, scenario: &ScenarioName) {
        self.inner.lock().tally(scenario).dropped += 1;
    }

    /// Passed checks over total checks, or `None` with no checks in scope.
    #[must_use]
    pub fn check_pass_rate(&self, scope: Option<&str>) -> Option<f64> {
        let (passed, total) = {
            let inner = self.inner.lock();
            (
                inner.sum(scope, |t| t.checks_passed),
                inner.sum(scope, |t| t.checks_total),
            )
        };
        ratio(passed, total)
    }

    /// Failed requests over total requests, or `None` with no requests in scope.
    #[must_use]
    pub fn request_fail_rate(&self, scope: Option<&str>) -> Option<f64> {
        let (failed, total) = {
            let inner = self.inner.lock();
            (
                inner.sum(scope, |t| t.failed_requests),
                inner.sum(scope, |t| t.requests),
            )
        };
        ratio(failed, total)
    }

    /// Ascending request durations in milliseconds.
    fn sorted_durations(&self, scope: Option<&str>) -> Vec<f64> {
        let mut durations: Vec<f64> = {
            let inner = self.inner.lock();
            inner
                .durations
                .iter()
                .filter(|(scenario, _)| in_scope(scenario, scope))
                .flat_map(|(_, durations)| durations.iter().copied())
                .collect()
        };
        durations.sort_by(f64::total_cmp);
        durations
    }

    /// The `p`-th percentile of request durations in milliseconds.
    #[must_use]
    pub fn duration_percentile(&self, p: f64, scope: Option<&str>) -> Option<f64> {
        percentile(&self.sorted_durations(scope), p)
    }

    #[must_use]
    pub fn request_count(&self, scope: Option<&str>) -> u64 {
        self.inner.lock().sum(scope, |t| t.requests)
    }

    #[must_use]
    pub fn iteration_count(&self, scope: Option<&str>) -> u64 {
        self.inner.lock().sum(scope, |t| t.iterations)
    }

    #[must_use]
    pub fn dropped_arrivals(&self, scope: Option<&str>) -> u64 {
        self.inner.lock().sum(scope, |t| t.dropped)
    }

    /// Reduce the selected metric with `aggregation`.
    ///
    /// Rates and trends are `None` when nothing was recorded in scope.
    /// Counters are always defined and may be zero.
    #[must_use]
    pub fn observe(&self, selector: &MetricSelector, aggregation: Aggregation) -> Option<f64> {
        let scope = selector.scenario.as_deref();

        match (selector.metric, aggregation) {
            (MetricKind::Checks, Aggregation::Rate) => self.check_pass_rate(scope),
            (MetricKind::HttpReqFailed, Aggregation::Rate) => self.request_fail_rate(scope),
            (MetricKind::HttpReqDuration, aggregation) => {
                let durations = self.sorted_durations(scope);
                match aggregation {
                    Aggregation::Percentile(p) => percentile(&durations, p),
                    Aggregation::Med => percentile(&durations, 50.0),
                    Aggregation::Min => durations.first().copied(),
                    Aggregation::Max => durations.last().copied(),
                    Aggregation::Avg => (!durations.is_empty())
                        .then(|| durations.iter().sum::<f64>() / durations.len() as f64),
                    Aggregation::Rate | Aggregation::Count => None,
                }
            }
            (MetricKind::HttpReqs, Aggregation::Count) => Some(self.request_count(scope) as f64),
            (MetricKind::Iterations, Aggregation::Count) => {
                Some(self.iteration_count(scope) as f64)
            }
            (MetricKind::DroppedIterations, Aggregation::Count) => {
                Some(self.dropped_arrivals(scope) as f64)
            }
            _ => None,
        }
    }

    /// Judge a single threshold against current data.
    #[must_use]
    pub fn judge(&self, spec: &ThresholdSpec) -> ThresholdOutcome {
        let observed = self.observe(&spec.selector, spec.predicate.aggregation);
        ThresholdOutcome::judge(spec, observed)
    }

    /// Judge every threshold. `overall_passed` holds only if all pass.
    #[must_use]
    pub fn evaluate(&self, thresholds: &[ThresholdSpec]) -> RunResult {
        RunResult::new(thresholds.iter().map(|spec| self.judge(spec)).collect())
    }

    /// Per-scenario counters without latency, ordered by scenario name.
    ///
    /// Reads only the running tallies, so it is safe to call on every
    /// progress tick.
    #[must_use]
    pub fn scenario_progress(&self) -> Vec<ScenarioSummary> {
        let tallies = self.inner.lock().tallies.clone();
        tallies
            .iter()
            .map(|(scenario, tally)| ScenarioSummary {
                scenario: scenario.to_string(),
                iterations: tally.iterations,
                dropped_iterations: tally.dropped,
                requests: tally.requests,
                failed_requests: tally.failed_requests,
                checks_passed: tally.checks_passed,
                checks_total: tally.checks_total,
                p95_ms: None,
            })
            .collect()
    }

    /// Per-scenario counters with p95 latency, ordered by scenario name.
    #[must_use]
    pub fn scenario_summary(&self) -> Vec<ScenarioSummary> {
        self.scenario_progress()
            .into_iter()
            .map(|summary| {
                let p95_ms = self.duration_percentile(95.0, Some(&summary.scenario));
                ScenarioSummary { p95_ms, ..summary }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scenario(name: &str) -> ScenarioName {
        Arc::from(name)
    }

    fn sample(scenario: &ScenarioName, millis: u64, failed: bool) -> RequestSample {
        RequestSample {
            scenario: Arc::clone(scenario),
            name: "GET /ping",
            duration: Duration::from_millis(millis),
            failed,
            status: if failed { Some(500) } else { Some(200) },
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        assert_eq!(percentile(&[], 95.0), None);
        assert_eq!(percentile(&[42.0], 95.0), Some(42.0));
        assert_eq!(percentile(&[10.0, 20.0], 50.0), Some(15.0));
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.0), Some(1.0));
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 100.0), Some(5.0));
    }

    #[test]
    fn test_fail_rate_around_one_percent() {
        let ping = scenario("ping");
        let threshold = ThresholdSpec::parse("http_req_failed", "rate<0.01").unwrap();

        let aggregator = MetricsAggregator::new();
        for i in 0..1000 {
            aggregator.record_sample(sample(&ping, 5, i < 5));
        }
        assert_eq!(aggregator.request_fail_rate(None), Some(0.005));
        assert!(aggregator.evaluate(&[threshold.clone()]).overall_passed);

        let aggregator = MetricsAggregator::new();
        for i in 0..1000 {
            aggregator.record_sample(sample(&ping, 5, i < 11));
        }
        assert_eq!(aggregator.request_fail_rate(None), Some(0.011));
        assert!(!aggregator.evaluate(&[threshold]).overall_passed);
    }

    #[test]
    fn test_p95_boundary() {
        let ping = scenario("ping");
        let threshold = ThresholdSpec::parse("http_req_duration", "p(95)<500").unwrap();

        let aggregator = MetricsAggregator::new();
        for _ in 0..950 {
            aggregator.record_sample(sample(&ping, 100, false));
        }
        for _ in 0..50 {
            aggregator.record_sample(sample(&ping, 600, false));
        }
        let p95 = aggregator.duration_percentile(95.0, None).unwrap();
        assert!(p95 < 500.0, "p95 was {p95}");
        assert!(aggregator.evaluate(&[threshold.clone()]).overall_passed);

        let aggregator = MetricsAggregator::new();
        for _ in 0..949 {
            aggregator.record_sample(sample(&ping, 100, false));
        }
        for _ in 0..51 {
            aggregator.record_sample(sample(&ping, 600, false));
        }
        let result = aggregator.evaluate(&[threshold]);
        assert!(!result.overall_passed);
        assert_eq!(result.thresholds[0].observed, Some(600.0));
    }

    #[test]
    fn test_zero_checks_is_no_data() {
        let aggregator = MetricsAggregator::new();
        let ping = scenario("ping");
        aggregator.record_check(CheckResult::new(&ping, "ping 200", true));

        assert_eq!(aggregator.check_pass_rate(Some("ping")), Some(1.0));
        assert_eq!(aggregator.check_pass_rate(Some("put_get")), None);

        let threshold = ThresholdSpec::parse("checks{scenario:put_get}", "rate>0.98").unwrap();
        let result = aggregator.evaluate(&[threshold]);
        assert_eq!(result.thresholds[0].observed, None);
        assert!(!result.overall_passed);
    }

    #[test]
    fn test_check_rate_is_scoped() {
        let aggregator = MetricsAggregator::new();
        let ping = scenario("ping");
        let put_get = scenario("put_get");

        for i in 0..100 {
            aggregator.record_check(CheckResult::new(&ping, "ping 200", true));
            aggregator.record_check(CheckResult::new(&put_get, "get 200", i % 10 != 0));
        }

        assert_eq!(aggregator.check_pass_rate(Some("ping")), Some(1.0));
        assert_eq!(aggregator.check_pass_rate(Some("put_get")), Some(0.9));
        assert_eq!(aggregator.check_pass_rate(None), Some(0.95));
    }

    #[test]
    fn test_counters_default_to_zero() {
        let aggregator = MetricsAggregator::new();
        let dropped = ThresholdSpec::parse("dropped_iterations", "count<1").unwrap();
        let result = aggregator.evaluate(&[dropped]);
        assert_eq!(result.thresholds[0].observed, Some(0.0));
        assert!(result.overall_passed);

        let ping = scenario("ping");
        aggregator.record_dropped(&ping);
        aggregator.record_dropped(&ping);
        assert_eq!(aggregator.dropped_arrivals(None), 2);
        assert_eq!(aggregator.dropped_arrivals(Some("put_get")), 0);
    }

    #[test]
    fn test_record_iteration_and_summary() {
        let aggregator = MetricsAggregator::new();
        let put_get = scenario("put_get");

        let mut outcome = IterationOutcome::new();
        outcome.push_sample(sample(&put_get, 10, false));
        outcome.push_sample(sample(&put_get, 30, true));
        outcome.push_check(CheckResult::new(&put_get, "put 200/201", true));
        outcome.push_check(CheckResult::new(&put_get, "get 200", false));
        aggregator.record_iteration(&put_get, outcome);
        aggregator.record_dropped(&put_get);

        assert_eq!(aggregator.iteration_count(None), 1);
        assert_eq!(aggregator.request_count(Some("put_get")), 2);

        let summary = aggregator.scenario_summary();
        assert_eq!(summary.len(), 1);
        let put_get_summary = &summary[0];
        assert_eq!(put_get_summary.scenario, "put_get");
        assert_eq!(put_get_summary.iterations, 1);
        assert_eq!(put_get_summary.dropped_iterations, 1);
        assert_eq!(put_get_summary.requests, 2);
        assert_eq!(put_get_summary.failed_requests, 1);
        assert_eq!(put_get_summary.check_pass_rate(), Some(0.5));
        assert_eq!(put_get_summary.p95_ms, Some(29.0));
    }

    #[test]
    fn test_progress_matches_summary_without_latency() {
        let aggregator = MetricsAggregator::new();
        let ping = scenario("ping");
        let put_get = scenario("put_get");

        for i in 0..20 {
            let mut outcome = IterationOutcome::new();
            outcome.push_sample(sample(&ping, 10 + i, i % 5 == 0));
            outcome.push_check(CheckResult::new(&ping, "ping 200", i % 5 != 0));
            aggregator.record_iteration(&ping, outcome);
        }
        aggregator.record_dropped(&put_get);

        let progress = aggregator.scenario_progress();
        let summary = aggregator.scenario_summary();
        assert_eq!(progress.len(), 2);
        assert!(progress.iter().all(|s| s.p95_ms.is_none()));

        for (live, full) in progress.iter().zip(&summary) {
            assert_eq!(live.scenario, full.scenario);
            assert_eq!(live.iterations, full.iterations);
            assert_eq!(live.requests, full.requests);
            assert_eq!(live.failed_requests, full.failed_requests);
            assert_eq!(live.checks_passed, full.checks_passed);
            assert_eq!(live.dropped_iterations, full.dropped_iterations);
        }

        assert_eq!(progress[0].scenario, "ping");
        assert_eq!(progress[0].failed_requests, 4);
        assert_eq!(progress[0].checks_passed, 16);
        assert_eq!(progress[1].dropped_iterations, 1);
        assert_eq!(progress[1].requests, 0);
        assert!(summary[0].p95_ms.is_some());
        assert_eq!(summary[1].p95_ms, None);
    }

    #[test]
    fn test_trend_aggregations() {
        let aggregator = MetricsAggregator::new();
        let ping = scenario("ping");
        for millis in [10, 20, 30, 40] {
            aggregator.record_sample(sample(&ping, millis, false));
        }

        let selector = MetricSelector::global(MetricKind::HttpReqDuration);
        assert_eq!(aggregator.observe(&selector, Aggregation::Min), Some(10.0));
        assert_eq!(aggregator.observe(&selector, Aggregation::Max), Some(40.0));
        assert_eq!(aggregator.observe(&selector, Aggregation::Avg), Some(25.0));
        assert_eq!(aggregator.observe(&selector, Aggregation::Med), Some(25.0));
    }

    #[test]
    fn test_concurrent_recording() {
        let aggregator = MetricsAggregator::shared();
        let ping = scenario("ping");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                let ping = Arc::clone(&ping);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let mut outcome = IterationOutcome::new();
                        outcome.push_check(CheckResult::new(&ping, "ping 200", true));
                        outcome.push_sample(sample(&ping, 1, false));
                        aggregator.record_iteration(&ping, outcome);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(aggregator.iteration_count(Some("ping")), 2000);
        assert_eq!(aggregator.request_count(None), 2000);
        assert_eq!(aggregator.check_pass_rate(None), Some(1.0));
    }
}
