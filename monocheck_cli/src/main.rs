use monocheck_core::campaign::{self, Campaign};
use monocheck_core::config::MonocheckConfig;
use monocheck_core::deltadebug::{DeltaDebugger, ProbeSettings};
use monocheck_core::model::{Configuration, Target};
use monocheck_core::option::Level;
use monocheck_core::scheduler::JobScheduler;
use monocheck_core::tool::{RunnerOverrides, ToolRegistry};
use monocheck_core::violation::{PotentialViolation, Violation};
use monocheck_core::ViolationChecker;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a campaign, check the results and persist violations.
    Run(RunArgs),
    /// Check previously saved finished jobs.
    Check(CheckArgs),
    /// Reduce saved violations with the configured shrinker.
    DeltaDebug(DeltaDebugArgs),
    /// Print the precision ranks of every configured option.
    Options,
}

#[derive(Args, Debug)]
struct ToolArgs {
    #[clap(long)]
    tool: String,
    #[clap(long)]
    task: String,
    /// Known-true units, one per line.
    #[clap(long)]
    groundtruths: Option<PathBuf>,
    /// Per-job timeout in minutes, overriding the tool's own.
    #[clap(long)]
    timeout: Option<u64>,
    #[clap(long)]
    whole_program: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[clap(flatten)]
    tool: ToolArgs,
    /// A saved campaign to run instead of generating one.
    #[clap(long, conflicts_with = "targets")]
    campaign: Option<PathBuf>,
    /// JSON list of targets to sweep.
    #[clap(long, required_unless_present = "campaign")]
    targets: Option<PathBuf>,
    /// Base configuration entries, `option=level`.
    #[clap(long = "set", value_parser = parse_setting)]
    base: Vec<(String, Level)>,
    /// Reduce each violation found.
    #[clap(long)]
    delta_debug: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[clap(flatten)]
    tool: ToolArgs,
    /// Finished jobs saved by `run`; defaults to the campaign's.
    #[clap(long)]
    finished: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DeltaDebugArgs {
    #[clap(flatten)]
    tool: ToolArgs,
    /// Violation snapshots; defaults to every one in the campaign.
    violations: Vec<PathBuf>,
}

fn parse_setting(s: &str) -> Result<(String, Level), String> {
    let (option, level) = s
        .split_once('=')
        .ok_or_else(|| format!("expected option=level, got '{s}'"))?;
    Ok((option.to_string(), parse_level(level)))
}

fn parse_level(s: &str) -> Level {
    s.parse::<i64>().map(Level::Number).unwrap_or_else(|_| Level::from(s))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), anyhow::Error> {
    init_tracing();
    let cli = Cli::parse();
    let (config, config_path) = MonocheckConfig::discover(cli.config_file.as_deref())?;

    match cli.command {
        Command::Run(args) => run(&config, config_path, args),
        Command::Check(args) => check(&config, args),
        Command::DeltaDebug(args) => delta_debug(&config, config_path, args),
        Command::Options => print_options(&config),
    }
}

fn checker_for(config: &MonocheckConfig, registry: &ToolRegistry, args: &ToolArgs) -> anyhow::Result<ViolationChecker> {
    let adapter = registry.resolve(&args.tool, &args.task)?;
    let mut checker = ViolationChecker::new(config.option_set()?, adapter.reader);
    if let Some(path) = &args.groundtruths {
        checker = checker.with_ground_truths(ViolationChecker::load_ground_truths(path)?);
    }
    Ok(checker)
}

fn registry_for(config: &MonocheckConfig, args: &ToolArgs) -> ToolRegistry {
    ToolRegistry::from_config(config, &RunnerOverrides {
        timeout: args.timeout.map(|m| Duration::from_secs(m.saturating_mul(60))),
        whole_program: args.whole_program,
    })
}

fn delta_debugger_for(config: &MonocheckConfig, config_path: Option<PathBuf>, args: &ToolArgs) -> anyhow::Result<DeltaDebugger> {
    let absolute = |p: &Path| std::path::absolute(p).with_context(|| format!("Cannot resolve {p:?}"));
    Ok(DeltaDebugger::new(
        config.delta_debug.clone(),
        absolute(&config.campaign.benchmarks_dir)?,
        ProbeSettings {
            tool: args.tool.clone(),
            task: args.task.clone(),
            groundtruths: args.groundtruths.as_deref().map(absolute).transpose()?,
            whole_program: args.whole_program,
            config: config_path.as_deref().map(absolute).transpose()?,
        },
    ))
}

fn run(config: &MonocheckConfig, config_path: Option<PathBuf>, args: RunArgs) -> anyhow::Result<()> {
    let registry = registry_for(config, &args.tool);
    let adapter = registry.resolve(&args.tool.tool, &args.tool.task)?;
    let checker = checker_for(config, &registry, &args.tool)?;

    let campaign = match (&args.campaign, &args.targets) {
        (Some(path), _) => Campaign::load(path)?,
        (None, Some(path)) => {
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read targets {path:?}"))?;
            let targets: Vec<Target> =
                serde_json::from_slice(&bytes).with_context(|| format!("Malformed targets file {path:?}"))?;
            let base: Configuration = args.base.into_iter().collect();
            Campaign::one_option_sweep(&targets, &config.option_set()?, &base, &args.tool.tool)
        }
        (None, None) => anyhow::bail!("Either --campaign or --targets is required"),
    };

    let campaign_dir = &config.campaign.directory;
    let results_dir = campaign_dir.join("results");
    std::fs::create_dir_all(&results_dir).with_context(|| format!("Cannot create {results_dir:?}"))?;
    campaign.save(&campaign_dir.join("campaign.json"))?;

    let start_time = Instant::now();
    let finished = JobScheduler::new(config.campaign.workers).run(adapter.runner.as_ref(), campaign.jobs, &results_dir);
    let succeeded = finished.iter().filter(|f| f.has_results()).count();
    info!(jobs = finished.len(), succeeded, elapsed = ?start_time.elapsed(), "campaign finished");
    campaign::save_finished(&campaign_dir.join("finished.json"), &finished)?;

    let violations = checker.check_violations(&finished);
    report(&violations, campaign_dir)?;

    if args.delta_debug && !violations.is_empty() {
        let dd = delta_debugger_for(config, config_path, &args.tool)?;
        let outcomes = dd.delta_debug_all(&violations, campaign_dir, args.tool.timeout);
        info!(reduced = outcomes.len(), "delta debugging finished");
    }
    Ok(())
}

fn check(config: &MonocheckConfig, args: CheckArgs) -> anyhow::Result<()> {
    let registry = registry_for(config, &args.tool);
    let checker = checker_for(config, &registry, &args.tool)?;
    let path = args
        .finished
        .unwrap_or_else(|| config.campaign.directory.join("finished.json"));
    let finished = campaign::load_finished(&path)?;
    let violations = checker.check_violations(&finished);
    report(&violations, &config.campaign.directory)
}

fn report(violations: &[PotentialViolation], campaign_dir: &Path) -> anyhow::Result<()> {
    let paths = ViolationChecker::persist(violations, campaign_dir)?;
    for (violation, path) in violations.iter().zip(&paths) {
        println!(
            "{} ({:?}, {} units): {}",
            violation.expected_relation(),
            violation.kind,
            violation.expected_diffs.len(),
            path.display()
        );
    }
    println!("{} violation(s) found", violations.len());
    Ok(())
}

fn delta_debug(config: &MonocheckConfig, config_path: Option<PathBuf>, args: DeltaDebugArgs) -> anyhow::Result<()> {
    let paths = if args.violations.is_empty() {
        let dir = config.campaign.directory.join("violations");
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&dir).with_context(|| format!("Cannot list {dir:?}"))? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                found.push(path);
            }
        }
        found.sort();
        found
    } else {
        args.violations
    };

    let mut violations = Vec::new();
    for path in &paths {
        match Violation::load(path) {
            Ok(snapshot) => violations.push(snapshot.violation),
            Err(e) => warn!(?path, error = %e, "skipping unreadable violation"),
        }
    }
    let dd = delta_debugger_for(config, config_path, &args.tool)?;
    let outcomes = dd.delta_debug_all(&violations, &config.campaign.directory, args.tool.timeout);
    for outcome in &outcomes {
        println!("{} -> {}", outcome.edge.unit, outcome.archive.display());
    }
    println!("{} edge(s) reduced from {} violation(s)", outcomes.len(), violations.len());
    Ok(())
}

fn print_options(config: &MonocheckConfig) -> anyhow::Result<()> {
    for (name, order) in config.option_set()? {
        let ranks: Vec<String> = order.ranks().iter().map(ToString::to_string).collect();
        println!("{name}: {}", ranks.join(" < "));
    }
    Ok(())
}
