use clap::Parser;
use kvload_core::{CoreError, RunConfig};
use kvload_runner::{Orchestrator, ReportFormat, ResultWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

mod telemetry;

#[derive(Parser, Debug)]
#[command(name = "kvload")]
#[command(about = "Rate-controlled load generator for the KV cache gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (YAML, TOML or JSON); environment variables still override it
    #[arg(short, long, env = "KVLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Report format: text, markdown or json
    #[arg(short, long, default_value = "text")]
    format: ReportFormat,

    /// Also write the report to this file
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Debug logging (unless RUST_LOG is set)
    #[arg(short, long)]
    verbose: bool,
}

/// Runs the load test and returns whether every threshold passed.
async fn run(cli: &Cli) -> Result<bool, CoreError> {
    let config = RunConfig::load(cli.config.as_deref())?;
    let orchestrator = Orchestrator::new(config)?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping run");
            stop.stop("interrupted");
        }
    });

    let report = orchestrator.run().await?;
    let writer = ResultWriter::new(&report);

    println!("{}", writer.render(cli.format)?);

    if let Some(path) = &cli.out {
        writer.write_report(path, cli.format)?;
        info!(path = %path.display(), "report written");
    }

    Ok(report.passed())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init_logging(cli.verbose);

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::from(2)
        }
    }
}
