//! Workload definitions.
//!
//! A scenario runs one iteration per call and returns what it observed. The
//! executor owns pacing, worker slots, and forwarding outcomes to the
//! aggregator, so scenarios never touch shared state.

mod ping;
mod put_get;

pub use ping::Ping;
pub use put_get::PutGet;

use crate::client::{HttpOutcome, KvTransport};
use async_trait::async_trait;
use kvload_core::key::{self, WorkerId};
use kvload_core::{
    CheckResult, CoreError, CoreResult, IterationOutcome, RequestSample, RunConfig, ScenarioName,
    SCENARIO_PING, SCENARIO_PUT_GET,
};
use std::sync::Arc;
use std::time::Duration;

/// Per-invocation state handed to [`Scenario::run`].
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub worker_id: WorkerId,
    /// Monotonic per worker, starting at zero.
    pub iteration: u64,
    pub scenario: ScenarioName,
}

impl IterationContext {
    /// Unique key for this iteration.
    #[must_use]
    pub fn key(&self, prefix: &str) -> String {
        key::generate(prefix, self.worker_id, self.iteration)
    }

    #[must_use]
    pub fn check(&self, name: &str, passed: bool) -> CheckResult {
        CheckResult::new(&self.scenario, name, passed)
    }

    /// Turn a transport outcome into a request sample.
    #[must_use]
    pub fn sample(
        &self,
        name: &'static str,
        outcome: &HttpOutcome,
        expected: &[u16],
    ) -> RequestSample {
        RequestSample {
            scenario: Arc::clone(&self.scenario),
            name,
            duration: outcome.elapsed,
            failed: !outcome.is_one_of(expected),
            status: outcome.status,
        }
    }
}

/// One named workload.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Idle time after each iteration during which the worker stays busy.
    fn settle(&self) -> Duration;

    /// Perform one iteration. Failures are reported in the outcome.
    async fn run(&self, ctx: &IterationContext) -> IterationOutcome;
}

/// Build every scenario named in `config.scenario_rates`.
pub fn build_scenarios(
    config: &RunConfig,
    transport: Arc<dyn KvTransport>,
) -> CoreResult<Vec<Arc<dyn Scenario>>> {
    config
        .scenario_rates
        .keys()
        .map(|name| -> CoreResult<Arc<dyn Scenario>> {
            match name.as_str() {
                SCENARIO_PING => Ok(Arc::new(Ping::new(Arc::clone(&transport), config.settle))),
                SCENARIO_PUT_GET => Ok(Arc::new(PutGet::new(
                    Arc::clone(&transport),
                    config.key_prefix.clone(),
                    config.value.clone(),
                    config.ttl,
                    config.settle,
                ))),
                other => Err(CoreError::validation(format!("unknown scenario `{other}`"))),
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory transport that logs calls and answers with fixed statuses.
    /// `None` simulates a transport error.
    pub struct FakeTransport {
        calls: Mutex<Vec<String>>,
        ping_status: Option<u16>,
        put_status: Option<u16>,
        get_status: Option<u16>,
    }

    impl FakeTransport {
        pub fn healthy() -> Self {
            Self::with_statuses(Some(200), Some(201), Some(200))
        }

        pub fn with_statuses(ping: Option<u16>, put: Option<u16>, get: Option<u16>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                ping_status: ping,
                put_status: put,
                get_status: get,
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, call: String, status: Option<u16>) -> HttpOutcome {
            self.calls.lock().unwrap().push(call);
            match status {
                Some(status) => HttpOutcome::status(status, Duration::from_millis(2)),
                None => HttpOutcome::transport_error("connection refused", Duration::from_millis(1)),
            }
        }
    }

    #[async_trait]
    impl KvTransport for FakeTransport {
        async fn ping(&self) -> HttpOutcome {
            self.answer("GET /ping".to_string(), self.ping_status)
        }

        async fn put(&self, key: &str, value: &str, ttl: Duration) -> HttpOutcome {
            let call = format!("PUT /kv/{key} {value} {}", ttl.as_millis());
            self.answer(call, self.put_status)
        }

        async fn get(&self, key: &str) -> HttpOutcome {
            self.answer(format!("GET /kv/{key}"), self.get_status)
        }
    }

    pub fn context(scenario: &str, worker_id: WorkerId, iteration: u64) -> IterationContext {
        IterationContext {
            worker_id,
            iteration,
            scenario: Arc::from(scenario),
        }
    }
}
