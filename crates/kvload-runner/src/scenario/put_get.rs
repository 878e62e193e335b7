use super::{IterationContext, Scenario};
use crate::client::KvTransport;
use async_trait::async_trait;
use kvload_core::{IterationOutcome, SCENARIO_PUT_GET};
use std::sync::Arc;
use std::time::Duration;

const PUT_CHECK: &str = "put 200/201";
const GET_CHECK: &str = "get 200";
const PUT_REQUEST: &str = "PUT /kv/{key}";
const GET_REQUEST: &str = "GET /kv/{key}";

/// Write a fresh key with a TTL, then read it back.
///
/// The read is issued once the write has resolved, whatever its result, so a
/// failed write followed by a failed read shows up as two separate checks.
pub struct PutGet {
    transport: Arc<dyn KvTransport>,
    key_prefix: String,
    value: String,
    ttl: Duration,
    settle: Duration,
}

impl PutGet {
    pub fn new(
        transport: Arc<dyn KvTransport>,
        key_prefix: String,
        value: String,
        ttl: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            transport,
            key_prefix,
            value,
            ttl,
            settle,
        }
    }
}

#[async_trait]
impl Scenario for PutGet {
    fn name(&self) -> &str {
        SCENARIO_PUT_GET
    }

    fn settle(&self) -> Duration {
        self.settle
    }

    async fn run(&self, ctx: &IterationContext) -> IterationOutcome {
        let key = ctx.key(&self.key_prefix);
        let mut outcome = IterationOutcome::new();

        let put = self.transport.put(&key, &self.value, self.ttl).await;
        outcome.push_sample(ctx.sample(PUT_REQUEST, &put, &[200, 201]));
        outcome.push_check(ctx.check(PUT_CHECK, put.is_one_of(&[200, 201])));

        let get = self.transport.get(&key).await;
        outcome.push_sample(ctx.sample(GET_REQUEST, &get, &[200]));
        outcome.push_check(ctx.check(GET_CHECK, get.is_one_of(&[200])));

        if !outcome.checks.iter().all(|c| c.passed) {
            tracing::debug!(
                worker = ctx.worker_id,
                key = %key,
                put_status = ?put.status,
                get_status = ?get.status,
                "put_get iteration failed"
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{context, FakeTransport};
    use super::*;

    fn scenario(transport: Arc<FakeTransport>) -> PutGet {
        PutGet::new(
            transport,
            "testkey".to_string(),
            "hola".to_string(),
            Duration::from_millis(100_000),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_put_then_get_same_key() {
        let transport = Arc::new(FakeTransport::healthy());
        let outcome = scenario(transport.clone())
            .run(&context("put_get", 4, 9))
            .await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("PUT /kv/testkey-4-9-"));
        assert!(calls[0].ends_with(" hola 100000"));

        let key = calls[0]
            .strip_prefix("PUT /kv/")
            .and_then(|rest| rest.split(' ').next())
            .unwrap();
        assert_eq!(calls[1], format!("GET /kv/{key}"));

        let names: Vec<&str> = outcome.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["put 200/201", "get 200"]);
        assert!(outcome.checks.iter().all(|c| c.passed));
        let labels: Vec<&str> = outcome.samples.iter().map(|s| s.name).collect();
        assert_eq!(labels, vec![PUT_REQUEST, GET_REQUEST]);
    }

    #[tokio::test]
    async fn test_get_runs_after_failed_put() {
        let transport = Arc::new(FakeTransport::with_statuses(None, Some(500), Some(404)));
        let outcome = scenario(transport.clone())
            .run(&context("put_get", 0, 0))
            .await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("PUT "));
        assert!(calls[1].starts_with("GET "));

        assert_eq!(outcome.checks.len(), 2);
        assert!(outcome.checks.iter().all(|c| !c.passed));
        assert!(outcome.samples.iter().all(|s| s.failed));
    }

    #[tokio::test]
    async fn test_get_runs_after_put_transport_error() {
        let transport = Arc::new(FakeTransport::with_statuses(None, None, Some(200)));
        let outcome = scenario(transport.clone())
            .run(&context("put_get", 0, 0))
            .await;

        assert_eq!(transport.calls().len(), 2);
        assert!(!outcome.checks[0].passed);
        assert!(outcome.checks[1].passed);
        assert_eq!(outcome.samples[0].status, None);
    }

    #[tokio::test]
    async fn test_put_accepts_200_and_201() {
        for status in [200, 201] {
            let transport = Arc::new(FakeTransport::with_statuses(None, Some(status), Some(200)));
            let outcome = scenario(transport).run(&context("put_get", 0, 0)).await;
            assert!(outcome.checks[0].passed, "status {status}");
        }
    }
}
