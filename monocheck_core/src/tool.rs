//! The boundary to external analysis tools.
//!
//! A tool integration provides two capabilities: a [`Runner`] that turns a
//! [`FuzzingJob`] into a [`FinishedJob`] by invoking the tool, and a [`Reader`]
//! that parses the tool's raw output into the set of comparable units the
//! violation checker works with. Integrations are resolved once, through the
//! [`ToolRegistry`], and then shared by every worker.

use crate::config::{MonocheckConfig, ReaderKind, TaskSettings, ToolSettings};
use crate::executor::{CommandExecutor, CommandExecutorConfig, ExecutionStatus};
use crate::model::{FinishedJob, FuzzingJob, JobOutcome};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Failed to read results file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed line {line} in {path:?}: {content}")]
    Malformed {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No tool named '{0}' is registered")]
    UnknownTool(String),
    #[error("Tool '{tool}' does not support task '{task}'")]
    UnsupportedTask { tool: String, task: String },
}

/// Runs a tool on one job.
///
/// Implementations must not fail for ordinary tool failures: a crash, a non-zero
/// exit or a timeout is reported as a [`FinishedJob`] without a results location.
pub trait Runner: Send + Sync {
    fn run_job(&self, job: &FuzzingJob, output_dir: &Path) -> FinishedJob;
}

/// Parses a tool's raw results into comparable units.
pub trait Reader: Send + Sync {
    fn read(&self, path: &Path) -> Result<BTreeSet<String>, ReaderError>;
}

/// Invokes a command-line tool, rendering the configuration as flags.
#[derive(Debug, Clone)]
pub struct CommandLineRunner {
    settings: ToolSettings,
    task: TaskSettings,
    timeout: Duration,
    whole_program: bool,
}

impl CommandLineRunner {
    pub fn new(settings: ToolSettings, task: TaskSettings) -> Self {
        let timeout = Duration::from_secs(settings.timeout_secs);
        Self {
            settings,
            task,
            timeout,
            whole_program: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_whole_program(mut self, whole_program: bool) -> Self {
        self.whole_program = whole_program;
        self
    }

    /// The full command line for `job`, writing results to `output`.
    pub fn command_line(&self, job: &FuzzingJob, output: &Path) -> Vec<String> {
        let mut command = self.settings.command.clone();
        for (option, value) in job.configuration.iter() {
            let rendered = self
                .settings
                .option_format
                .replace("{option}", option)
                .replace("{value}", &value.to_string());
            command.extend(rendered.split_whitespace().map(str::to_string));
        }
        command.extend(self.task.args.iter().cloned());
        if let Some(flag) = &self.settings.input_flag {
            command.push(flag.clone());
        }
        command.push(job.target.name.to_string_lossy().into_owned());
        if let Some(flag) = &self.settings.output_flag {
            command.push(flag.clone());
            command.push(output.to_string_lossy().into_owned());
        }
        if self.whole_program {
            match &self.settings.whole_program_flag {
                Some(flag) => command.push(flag.clone()),
                None => warn!(command = ?self.settings.command, "whole-program mode requested but tool has no flag for it"),
            }
        }
        command
    }
}

impl Runner for CommandLineRunner {
    fn run_job(&self, job: &FuzzingJob, output_dir: &Path) -> FinishedJob {
        let output = output_dir.join(job.result_file_name());
        let executor = CommandExecutor::new(CommandExecutorConfig {
            command: self.command_line(job, &output),
            timeout: self.timeout,
            working_dir: None,
            stdout_path: match self.settings.output_flag {
                Some(_) => None,
                None => Some(output.clone()),
            },
        });

        let start_time = Instant::now();
        let status = executor.execute();
        let elapsed = start_time.elapsed().as_secs_f64();
        debug!(tool = %job.tool, target = %job.target.basename(), ?status, elapsed, "job finished");

        match status {
            ExecutionStatus::Ok if output.exists() => {
                FinishedJob::succeeded(job.clone(), elapsed, output)
            }
            ExecutionStatus::Ok => FinishedJob::failed(
                job.clone(),
                elapsed,
                JobOutcome::Failed(format!("Tool exited cleanly but wrote no results to {output:?}")),
            ),
            ExecutionStatus::Timeout => FinishedJob::failed(job.clone(), elapsed, JobOutcome::TimedOut),
            ExecutionStatus::Failed(desc) | ExecutionStatus::Other(desc) => {
                FinishedJob::failed(job.clone(), elapsed, JobOutcome::Failed(desc))
            }
        }
    }
}

/// One unit per non-empty, trimmed line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineReader;

impl Reader for LineReader {
    fn read(&self, path: &Path) -> Result<BTreeSet<String>, ReaderError> {
        let content = read_results(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

static DOOP_EDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\[<](.*?)[\]>]\s(.*?)/(.*?)\s[\[<](.*?)[\]>]\s(.*)")
        .expect("DOOP edge pattern is valid")
});

/// DOOP call-graph edges, e.g. `<<ctx>> <caller>/call-site <<ctx>> <callee>`.
///
/// Each edge is normalized to its five fields joined by tabs so that the same
/// edge compares equal across runs regardless of spacing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DoopCallGraphReader;

impl DoopCallGraphReader {
    pub fn normalize(line: &str) -> Option<String> {
        let caps = DOOP_EDGE.captures(line)?;
        let fields: Vec<&str> = (1..=5)
            .map(|i| caps.get(i).map_or("", |m| m.as_str().trim()))
            .collect();
        Some(fields.join("\t"))
    }
}

impl Reader for DoopCallGraphReader {
    fn read(&self, path: &Path) -> Result<BTreeSet<String>, ReaderError> {
        let content = read_results(path)?;
        let mut edges = BTreeSet::new();
        for (ix, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let edge = Self::normalize(line).ok_or_else(|| ReaderError::Malformed {
                path: path.to_path_buf(),
                line: ix + 1,
                content: line.to_string(),
            })?;
            edges.insert(edge);
        }
        Ok(edges)
    }
}

fn read_results(path: &Path) -> Result<String, ReaderError> {
    std::fs::read_to_string(path).map_err(|source| ReaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl ReaderKind {
    pub fn reader(self) -> Arc<dyn Reader> {
        match self {
            ReaderKind::Lines => Arc::new(LineReader),
            ReaderKind::DoopCallgraph => Arc::new(DoopCallGraphReader),
        }
    }
}

/// A resolved {runner, reader} pair for one tool and task.
#[derive(Clone)]
pub struct ToolAdapter {
    pub runner: Arc<dyn Runner>,
    pub reader: Arc<dyn Reader>,
}

impl fmt::Debug for ToolAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolAdapter").finish_non_exhaustive()
    }
}

/// Adjustments applied to every command-line runner the registry builds.
#[derive(Debug, Clone, Default)]
pub struct RunnerOverrides {
    pub timeout: Option<Duration>,
    pub whole_program: bool,
}

/// Maps `(tool, task)` to its adapter. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, BTreeMap<String, ToolAdapter>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MonocheckConfig, overrides: &RunnerOverrides) -> Self {
        let mut registry = Self::new();
        for (tool, settings) in &config.tools {
            for (task, task_settings) in &settings.tasks {
                let mut runner = CommandLineRunner::new(settings.clone(), task_settings.clone())
                    .with_whole_program(overrides.whole_program);
                if let Some(timeout) = overrides.timeout {
                    runner = runner.with_timeout(timeout);
                }
                registry.register(tool, task, ToolAdapter {
                    runner: Arc::new(runner),
                    reader: task_settings.reader.reader(),
                });
            }
        }
        registry
    }

    pub fn register(&mut self, tool: &str, task: &str, adapter: ToolAdapter) {
        self.tools
            .entry(tool.to_string())
            .or_default()
            .insert(task.to_string(), adapter);
    }

    pub fn resolve(&self, tool: &str, task: &str) -> Result<ToolAdapter, RegistryError> {
        let tasks = self
            .tools
            .get(tool)
            .ok_or_else(|| RegistryError::UnknownTool(tool.to_string()))?;
        tasks
            .get(task)
            .cloned()
            .ok_or_else(|| RegistryError::UnsupportedTask {
                tool: tool.to_string(),
                task: task.to_string(),
            })
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}
