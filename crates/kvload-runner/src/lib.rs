//! Load generation for the KV cache gateway: HTTP transport, scenarios,
//! the constant-arrival-rate executor, run orchestration, and reporting.

pub mod client;
pub mod executor;
pub mod orchestrator;
pub mod reporter;
pub mod scenario;

pub use client::{HttpKvClient, HttpOutcome, KvTransport};
pub use executor::{ScenarioExecutor, ScenarioPlan, ScenarioStats};
pub use orchestrator::{Orchestrator, RunReport, StopHandle};
pub use reporter::{ReportFormat, ResultWriter};
pub use scenario::{build_scenarios, IterationContext, Ping, PutGet, Scenario};
