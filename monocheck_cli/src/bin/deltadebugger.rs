//! Violation probe run by the shrinker on every candidate.
//!
//! Exits 0 when the stored violation edge is still produced by the candidate
//! target and 1 otherwise, including when the inputs cannot be loaded.

use monocheck_core::config::MonocheckConfig;
use monocheck_core::deltadebug::Probe;
use monocheck_core::tool::{RunnerOverrides, ToolRegistry};

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct ProbeArgs {
    /// The violation snapshot.
    #[clap(long)]
    violation: PathBuf,
    /// The edge to preserve.
    #[clap(long)]
    edge: Option<PathBuf>,
    /// The candidate target program.
    #[clap(long)]
    target: PathBuf,
    #[clap(long)]
    tool: String,
    #[clap(long)]
    task: String,
    #[clap(long)]
    groundtruths: Option<PathBuf>,
    /// Per-job timeout in minutes.
    #[clap(long)]
    timeout: Option<u64>,
    #[clap(long)]
    whole_program: bool,
    #[clap(long)]
    config: Option<PathBuf>,
}

fn reproduce(args: ProbeArgs) -> Result<bool, anyhow::Error> {
    let (config, _) = MonocheckConfig::discover(args.config.as_deref())?;
    let registry = ToolRegistry::from_config(&config, &RunnerOverrides {
        timeout: args.timeout.map(|m| Duration::from_secs(m.saturating_mul(60))),
        whole_program: args.whole_program,
    });
    let adapter = registry.resolve(&args.tool, &args.task)?;
    let probe = Probe {
        violation: args.violation,
        edge: args.edge,
        target: args.target,
        groundtruths: args.groundtruths,
    };
    Ok(probe.reproduce(&adapter, &config.option_set()?)?)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match reproduce(ProbeArgs::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
