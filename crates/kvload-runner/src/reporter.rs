//! Report generation for finished runs.

use crate::orchestrator::RunReport;
use kvload_core::{CoreError, CoreResult, ThresholdOutcome};
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Human summary for the terminal
    #[default]
    Text,
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown report format `{other}` (expected text, markdown or json)"
            )),
        }
    }
}

fn observed(outcome: &ThresholdOutcome) -> String {
    match outcome.observed {
        Some(value) if value.fract() == 0.0 && value.abs() < 1e15 => format!("{value:.0}"),
        Some(value) => format!("{value:.4}"),
        None => "no data".to_string(),
    }
}

fn mark(passed: bool) -> &'static str {
    if passed {
        "✓"
    } else {
        "✗"
    }
}

/// Renders a [`RunReport`] in the requested format.
pub struct ResultWriter<'a> {
    report: &'a RunReport,
}

impl<'a> ResultWriter<'a> {
    #[must_use]
    pub fn new(report: &'a RunReport) -> Self {
        Self { report }
    }

    pub fn render(&self, format: ReportFormat) -> CoreResult<String> {
        match format {
            ReportFormat::Text => Ok(self.generate_text()),
            ReportFormat::Markdown => Ok(self.generate_markdown()),
            ReportFormat::Json => self.generate_json(),
        }
    }

    /// Write report to file
    pub fn write_report(&self, path: impl AsRef<Path>, format: ReportFormat) -> CoreResult<()> {
        let content = self.render(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    fn verdict(&self) -> &'static str {
        if self.report.passed() {
            "PASSED"
        } else {
            "FAILED"
        }
    }

    fn generate_text(&self) -> String {
        let report = self.report;
        let mut out = String::new();

        let _ = writeln!(out, "run {} ({:.1}s)", report.run_id, report.elapsed_secs);
        let _ = writeln!(out);
        let _ = writeln!(out, "thresholds:");
        for t in &report.result.thresholds {
            let _ = writeln!(
                out,
                "  {} {}: {} (observed {})",
                mark(t.passed),
                t.metric,
                t.predicate,
                observed(t)
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "scenarios:");
        for stats in &report.scenarios {
            let summary = report.summaries.iter().find(|s| s.scenario == stats.scenario);
            let (passed, total) = summary.map_or((0, 0), |s| (s.checks_passed, s.checks_total));
            let _ = writeln!(
                out,
                "  {}: rate {}/s, {} workers, {} dispatched, {} completed, checks {}/{}",
                stats.scenario,
                stats.target_rate,
                stats.workers,
                stats.dispatched,
                stats.completed,
                passed,
                total
            );
            if stats.dropped > 0 {
                let _ = writeln!(out, "    dropped arrivals: {}", stats.dropped);
            }
            if stats.abandoned > 0 {
                let _ = writeln!(out, "    abandoned iterations: {}", stats.abandoned);
            }
        }

        let _ = writeln!(out);
        if let Some(reason) = &report.result.aborted {
            let _ = writeln!(out, "aborted: {reason}");
        }
        let _ = writeln!(out, "result: {}", self.verdict());
        out
    }

    fn generate_markdown(&self) -> String {
        let report = self.report;
        let status = if report.passed() { "✅" } else { "❌" };

        let mut thresholds = String::new();
        for t in &report.result.thresholds {
            let _ = writeln!(
                thresholds,
                "| `{}` | `{}` | {} | {} |",
                t.metric,
                t.predicate,
                observed(t),
                if t.passed { "✅" } else { "❌" }
            );
        }

        let mut scenarios = String::new();
        for stats in &report.scenarios {
            let summary = report.summaries.iter().find(|s| s.scenario == stats.scenario);
            let p95 = summary
                .and_then(|s| s.p95_ms)
                .map_or_else(|| "-".to_string(), |ms| format!("{ms:.2}ms"));
            let _ = writeln!(
                scenarios,
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                stats.scenario,
                stats.target_rate,
                stats.workers,
                stats.dispatched,
                stats.completed,
                stats.dropped,
                stats.abandoned,
                p95
            );
        }

        let aborted = report
            .result
            .aborted
            .as_ref()
            .map(|reason| format!("\n**Aborted**: {reason}\n"))
            .unwrap_or_default();

        format!(
            r#"# Load Run Report: {}

**Status**: {} {}
{}
- **Started**: {}
- **Duration**: {:.1} seconds

---

## Thresholds

| Metric | Predicate | Observed | Status |
|--------|-----------|----------|--------|
{}
---

## Scenarios

| Scenario | Rate (/s) | Workers | Dispatched | Completed | Dropped | Abandoned | P95 |
|----------|-----------|---------|------------|-----------|---------|-----------|-----|
{}"#,
            report.run_id,
            status,
            self.verdict(),
            aborted,
            report.started_at.to_rfc3339(),
            report.elapsed_secs,
            thresholds,
            scenarios,
        )
    }

    fn generate_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self.report).map_err(CoreError::from)
    }
}
