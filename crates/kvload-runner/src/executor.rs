//! Constant-arrival-rate scheduler.
//!
//! One executor drives one scenario. A pacing clock ticks every
//! `1 / rate` seconds; each tick takes a free worker slot and starts an
//! iteration on it, or is counted as a dropped arrival when every slot is
//! busy. The clock never waits for iterations to finish.
//!
//! A slot stays busy for the iteration plus the scenario's settle interval.
//! Outcomes are forwarded to the aggregator only when the scheduler joins the
//! task, so iterations abandoned after the grace period never reach metrics.

use crate::scenario::{IterationContext, Scenario};
use kvload_core::{IterationOutcome, MetricsAggregator, ScenarioName, WorkerId};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Reason a run was asked to stop early; `None` while running.
pub type StopSignal = watch::Receiver<Option<String>>;

/// How one scenario is to be driven.
#[derive(Clone)]
pub struct ScenarioPlan {
    pub scenario: Arc<dyn Scenario>,
    /// Arrivals per second.
    pub rate: f64,
    /// Time between arrivals, from [`kvload_core::arrival_period`].
    pub period: Duration,
    /// Size of the worker pool.
    pub workers: usize,
    /// First id of this pool's contiguous worker id range.
    pub first_worker_id: WorkerId,
}

/// Live counters, readable while the executor runs.
#[derive(Debug, Default)]
pub struct ScenarioCounters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

impl ScenarioCounters {
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }
}

/// Final accounting for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioStats {
    pub scenario: String,
    pub target_rate: f64,
    pub workers: usize,
    pub dispatched: u64,
    pub completed: u64,
    pub dropped: u64,
    pub abandoned: u64,
}

#[derive(Debug)]
struct WorkerSlot {
    id: WorkerId,
    next_iteration: u64,
}

type Finished = (WorkerSlot, IterationOutcome);

pub struct ScenarioExecutor {
    plan: ScenarioPlan,
    name: ScenarioName,
    aggregator: Arc<MetricsAggregator>,
    counters: Arc<ScenarioCounters>,
}

impl ScenarioExecutor {
    pub fn new(plan: ScenarioPlan, aggregator: Arc<MetricsAggregator>) -> Self {
        let name: ScenarioName = Arc::from(plan.scenario.name());
        Self {
            plan,
            name,
            aggregator,
            counters: Arc::new(ScenarioCounters::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn counters(&self) -> Arc<ScenarioCounters> {
        Arc::clone(&self.counters)
    }

    /// Drive the scenario until `duration` elapses or `stop` fires, then give
    /// in-flight iterations up to `grace_period` to finish.
    pub async fn run(
        self,
        duration: Duration,
        grace_period: Duration,
        mut stop: StopSignal,
    ) -> ScenarioStats {
        let start = Instant::now();
        let deadline = sleep_until(start + duration);
        tokio::pin!(deadline);

        let mut ticker = interval_at(start, self.plan.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        // Popped from the back, so the lowest id goes out first.
        let mut free: Vec<WorkerSlot> = (0..self.plan.workers as u64)
            .rev()
            .map(|offset| WorkerSlot {
                id: self.plan.first_worker_id + offset,
                next_iteration: 0,
            })
            .collect();
        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        // A closed channel means nobody can ask for a stop any more.
        let mut stop_open = true;
        let mut running = stop.borrow().is_none();

        info!(
            scenario = %self.name,
            rate = self.plan.rate,
            workers = self.plan.workers,
            "scenario started"
        );

        while running {
            tokio::select! {
                biased;

                _ = &mut deadline => running = false,

                changed = stop.changed(), if stop_open => {
                    if changed.is_err() {
                        stop_open = false;
                    } else if stop.borrow().is_some() {
                        debug!(scenario = %self.name, "stop requested");
                        running = false;
                    }
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.finish(joined, &mut free);
                }

                _ = ticker.tick() => self.arrive(&mut free, &mut in_flight),
            }
        }

        self.drain(grace_period, &mut in_flight, &mut free).await;

        let stats = ScenarioStats {
            scenario: self.name.to_string(),
            target_rate: self.plan.rate,
            workers: self.plan.workers,
            dispatched: self.counters.dispatched(),
            completed: self.counters.completed(),
            dropped: self.counters.dropped(),
            abandoned: self.counters.abandoned(),
        };

        info!(
            scenario = %stats.scenario,
            dispatched = stats.dispatched,
            completed = stats.completed,
            dropped = stats.dropped,
            abandoned = stats.abandoned,
            "scenario finished"
        );

        stats
    }

    /// Handle one pacing tick.
    fn arrive(&self, free: &mut Vec<WorkerSlot>, in_flight: &mut JoinSet<Finished>) {
        let Some(mut slot) = free.pop() else {
            let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            self.aggregator.record_dropped(&self.name);
            if dropped == 1 {
                warn!(
                    scenario = %self.name,
                    workers = self.plan.workers,
                    "no free worker for scheduled arrival; target cannot keep up"
                );
            }
            return;
        };

        let ctx = IterationContext {
            worker_id: slot.id,
            iteration: slot.next_iteration,
            scenario: Arc::clone(&self.name),
        };
        slot.next_iteration += 1;

        let scenario = Arc::clone(&self.plan.scenario);
        in_flight.spawn(async move {
            let outcome = scenario.run(&ctx).await;
            let settle = scenario.settle();
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            (slot, outcome)
        });
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, joined: Result<Finished, JoinError>, free: &mut Vec<WorkerSlot>) {
        match joined {
            Ok((slot, outcome)) => {
                self.aggregator.record_iteration(&self.name, outcome);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                free.push(slot);
            }
            Err(e) => {
                // The slot went down with the task; the pool shrinks by one.
                warn!(scenario = %self.name, error = %e, "iteration task failed");
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn drain(
        &self,
        grace_period: Duration,
        in_flight: &mut JoinSet<Finished>,
        free: &mut Vec<WorkerSlot>,
    ) {
        if in_flight.is_empty() {
            return;
        }

        debug!(
            scenario = %self.name,
            in_flight = in_flight.len(),
            grace_ms = grace_period.as_millis() as u64,
            "waiting for in-flight iterations"
        );

        let drained = timeout(grace_period, async {
            while let Some(joined) = in_flight.join_next().await {
                self.finish(joined, free);
            }
        })
        .await;

        if drained.is_err() {
            let abandoned = in_flight.len() as u64;
            self.counters
                .abandoned
                .fetch_add(abandoned, Ordering::Relaxed);
            in_flight.detach_all();
            warn!(
                scenario = %self.name,
                abandoned,
                "grace period elapsed; abandoning in-flight iterations"
            );
        }
    }
}
