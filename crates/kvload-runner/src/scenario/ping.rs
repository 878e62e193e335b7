use super::{IterationContext, Scenario};
use crate::client::KvTransport;
use async_trait::async_trait;
use kvload_core::{IterationOutcome, SCENARIO_PING};
use std::sync::Arc;
use std::time::Duration;

const CHECK: &str = "ping 200";
const REQUEST: &str = "GET /ping";

/// Liveness probe: one `GET /ping`, expecting 200.
pub struct Ping {
    transport: Arc<dyn KvTransport>,
    settle: Duration,
}

impl Ping {
    pub fn new(transport: Arc<dyn KvTransport>, settle: Duration) -> Self {
        Self { transport, settle }
    }
}

#[async_trait]
impl Scenario for Ping {
    fn name(&self) -> &str {
        SCENARIO_PING
    }

    fn settle(&self) -> Duration {
        self.settle
    }

    async fn run(&self, ctx: &IterationContext) -> IterationOutcome {
        let response = self.transport.ping().await;
        if let Some(error) = &response.error {
            tracing::debug!(worker = ctx.worker_id, error = %error, "ping failed");
        }

        let mut outcome = IterationOutcome::new();
        outcome.push_sample(ctx.sample(REQUEST, &response, &[200]));
        outcome.push_check(ctx.check(CHECK, response.is_one_of(&[200])));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, FakeTransport};
    use super::*;

    #[tokio::test]
    async fn test_ping_passes_on_200() {
        let transport = Arc::new(FakeTransport::healthy());
        let ping = Ping::new(transport.clone(), Duration::ZERO);

        let outcome = ping.run(&context("ping", 1, 0)).await;

        assert_eq!(outcome.checks.len(), 1);
        assert_eq!(outcome.checks[0].name, "ping 200");
        assert!(outcome.checks[0].passed);
        assert_eq!(&*outcome.checks[0].scenario, "ping");
        assert_eq!(outcome.samples.len(), 1);
        assert!(!outcome.samples[0].failed);
        assert_eq!(transport.calls(), vec!["GET /ping"]);
    }

    #[tokio::test]
    async fn test_ping_records_failures_as_data() {
        for status in [Some(500), Some(204), None] {
            let transport = Arc::new(FakeTransport::with_statuses(status, None, None));
            let ping = Ping::new(transport, Duration::ZERO);

            let outcome = ping.run(&context("ping", 1, 0)).await;

            assert!(!outcome.checks[0].passed);
            assert!(outcome.samples[0].failed);
            assert_eq!(outcome.samples[0].status, status);
        }
    }
}
