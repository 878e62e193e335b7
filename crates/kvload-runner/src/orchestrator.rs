//! Run orchestration: one executor per scenario, all running concurrently,
//! plus a watcher that logs progress and enforces fail-fast thresholds.

use crate::client::{HttpKvClient, KvTransport};
use crate::executor::{
    ScenarioCounters, ScenarioExecutor, ScenarioPlan, ScenarioStats, StopSignal,
};
use crate::scenario::build_scenarios;
use chrono::{DateTime, Utc};
use kvload_core::{
    arrival_period, CoreError, CoreResult, MetricsAggregator, RunConfig, RunResult,
    ScenarioSummary, WorkerId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Wall time from start until every executor returned, in seconds.
    pub elapsed_secs: f64,
    pub result: RunResult,
    pub scenarios: Vec<ScenarioStats>,
    pub summaries: Vec<ScenarioSummary>,
}

impl RunReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.result.overall_passed
    }

    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        self.scenarios.iter().map(|s| s.dropped).sum()
    }
}

/// Handle for requesting a cooperative stop from outside the run.
#[derive(Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl StopHandle {
    /// Ask every executor to stop dispatching. The first reason wins.
    pub fn stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.sender.borrow().is_some()
    }

    fn subscribe(&self) -> StopSignal {
        self.sender.subscribe()
    }

    fn reason(&self) -> Option<String> {
        self.sender.borrow().clone()
    }
}

/// Drives a whole run from a validated [`RunConfig`].
pub struct Orchestrator {
    config: Arc<RunConfig>,
    transport: Arc<dyn KvTransport>,
    aggregator: Arc<MetricsAggregator>,
    stop: StopHandle,
}

impl Orchestrator {
    /// Orchestrator talking to `config.base_url` over HTTP.
    pub fn new(config: RunConfig) -> CoreResult<Self> {
        let transport = HttpKvClient::from_config(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: RunConfig, transport: Arc<dyn KvTransport>) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            config: Arc::new(config),
            transport,
            aggregator: MetricsAggregator::shared(),
            stop: StopHandle {
                sender: Arc::new(sender),
            },
        }
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[must_use]
    pub fn aggregator(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Plan every scenario, giving each pool its own worker id range.
    fn plan(&self) -> CoreResult<Vec<ScenarioPlan>> {
        let mut next_worker_id: WorkerId = 0;
        build_scenarios(&self.config, Arc::clone(&self.transport))?
            .into_iter()
            .map(|scenario| -> CoreResult<ScenarioPlan> {
                let rate = self.config.rate_of(scenario.name()).ok_or_else(|| {
                    CoreError::internal(format!("no rate for scenario `{}`", scenario.name()))
                })?;
                let workers = self.config.workers_for(rate);
                let plan = ScenarioPlan {
                    scenario,
                    rate,
                    period: arrival_period(rate)?,
                    workers,
                    first_worker_id: next_worker_id,
                };
                next_worker_id += workers as WorkerId;
                Ok(plan)
            })
            .collect()
    }

    /// Run every scenario to completion and evaluate thresholds.
    pub async fn run(&self) -> CoreResult<RunReport> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        let plans = self.plan()?;
        info!(
            %run_id,
            base_url = %self.config.base_url,
            duration = ?self.config.duration,
            scenarios = plans.len(),
            "starting run"
        );

        let mut progress = Vec::with_capacity(plans.len());
        let mut handles: Vec<JoinHandle<ScenarioStats>> = Vec::with_capacity(plans.len());
        for plan in plans {
            let executor = ScenarioExecutor::new(plan, Arc::clone(&self.aggregator));
            progress.push((executor.name().to_string(), executor.counters()));
            handles.push(tokio::spawn(executor.run(
                self.config.duration,
                self.config.grace_period,
                self.stop.subscribe(),
            )));
        }

        let watcher = tokio::spawn(watch_run(
            Arc::clone(&self.config),
            Arc::clone(&self.aggregator),
            progress,
            self.stop.clone(),
        ));

        let mut scenarios = Vec::with_capacity(handles.len());
        for handle in handles {
            let stats = handle
                .await
                .map_err(|e| CoreError::internal(format!("scenario executor failed: {e}")))?;
            scenarios.push(stats);
        }
        watcher.abort();

        let result = self
            .aggregator
            .evaluate(&self.config.thresholds)
            .with_abort(self.stop.reason());

        let report = RunReport {
            run_id,
            started_at,
            elapsed_secs: started.elapsed().as_secs_f64(),
            result,
            scenarios,
            summaries: self.aggregator.scenario_summary(),
        };

        info!(
            %run_id,
            passed = report.passed(),
            dropped = report.total_dropped(),
            elapsed_secs = report.elapsed_secs,
            "run finished"
        );

        Ok(report)
    }
}

/// Periodic progress logging and fail-fast threshold checks.
async fn watch_run(
    config: Arc<RunConfig>,
    aggregator: Arc<MetricsAggregator>,
    progress: Vec<(String, Arc<ScenarioCounters>)>,
    stop: StopHandle,
) {
    let fail_fast: Vec<_> = config
        .thresholds
        .iter()
        .filter(|spec| spec.abort_on_fail)
        .collect();

    let mut progress_tick = interval(config.progress_interval);
    progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut abort_tick = interval(config.abort_check_interval);
    abort_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Both intervals fire immediately; skip the empty first round.
    progress_tick.tick().await;
    abort_tick.tick().await;

    loop {
        tokio::select! {
            _ = progress_tick.tick() => log_progress(&aggregator, &progress),

            _ = abort_tick.tick(), if !fail_fast.is_empty() && !stop.is_stopped() => {
                for spec in &fail_fast {
                    let outcome = aggregator.judge(spec);
                    // No data yet is not a failure mid-run.
                    let Some(observed) = outcome.observed else {
                        continue;
                    };
                    if !outcome.passed {
                        warn!(
                            threshold = %spec,
                            observed,
                            "fail-fast threshold crossed; stopping run"
                        );
                        stop.stop(format!("threshold `{spec}` failed with {observed}"));
                        break;
                    }
                }
            }
        }
    }
}

fn log_progress(aggregator: &MetricsAggregator, progress: &[(String, Arc<ScenarioCounters>)]) {
    let summaries = aggregator.scenario_progress();
    for (scenario, counters) in progress {
        let (checks_passed, checks_total) = summaries
            .iter()
            .find(|s| &s.scenario == scenario)
            .map_or((0, 0), |s| (s.checks_passed, s.checks_total));

        info!(
            scenario = %scenario,
            dispatched = counters.dispatched(),
            completed = counters.completed(),
            dropped = counters.dropped(),
            checks_passed,
            checks_total,
            "progress"
        );
    }
}
