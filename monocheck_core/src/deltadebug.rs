//! Reduction of violating targets with an external shrinker.
//!
//! Every expected-difference edge of a violation gets its own working
//! directory under `<campaign>/deltadebugging/<key>/<target>/<edge-index>/`,
//! claimed by exclusively creating `log.txt` in it. The directory receives a
//! private copy of the benchmarks tree, the violation and edge snapshots, a
//! build script and a violation script. The shrinker repeatedly edits the
//! copied sources, runs the build script and then the violation script, which
//! calls back into [`Probe::reproduce`] through the `deltadebugger` binary.

use crate::archive::{self, ArchiveError, ArchiveRecord};
use crate::checker::ViolationChecker;
use crate::config::DeltaDebugSettings;
use crate::executor::{CommandExecutor, CommandExecutorConfig, ExecutionStatus};
use crate::model::Target;
use crate::option::{OptionSet, OrderError, PrecisionOrder};
use crate::scheduler::JobScheduler;
use crate::tool::{ReaderError, ToolAdapter};
use crate::violation::{DiffEdge, PotentialViolation, Violation, ViolationError};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const SENTINEL: &str = "log.txt";
pub const VIOLATION_FILE: &str = "violation.json";
pub const EDGE_FILE: &str = "edge.json";
pub const BUILD_SCRIPT: &str = "build_script";
pub const VIOLATION_SCRIPT: &str = "violation_script";
pub const ARCHIVE_FILE: &str = "reduced.tar.gz";
const SHRINKER_OUTPUT: &str = "shrinker.out";

#[derive(Error, Debug)]
pub enum DeltaDebugError {
    #[error("Cannot reduce {target:?}: it has no sources")]
    Precondition { target: PathBuf },
    #[error("Reduction directory {0:?} is already claimed")]
    Conflict(PathBuf),
    #[error("Delta debugging I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Violation(#[from] ViolationError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Order(#[from] OrderError),
}

fn io_error(path: &Path, source: io::Error) -> DeltaDebugError {
    DeltaDebugError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What the violation script forwards to the probe on every shrinker step.
#[derive(Debug, Clone, Default)]
pub struct ProbeSettings {
    pub tool: String,
    pub task: String,
    pub groundtruths: Option<PathBuf>,
    pub whole_program: bool,
    pub config: Option<PathBuf>,
}

/// One reduced edge.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionOutcome {
    pub directory: PathBuf,
    pub edge: DiffEdge,
    pub shrinker_status: ExecutionStatus,
    pub archive: PathBuf,
}

pub struct DeltaDebugger {
    settings: DeltaDebugSettings,
    benchmarks_dir: PathBuf,
    probe: ProbeSettings,
}

impl DeltaDebugger {
    pub fn new(settings: DeltaDebugSettings, benchmarks_dir: impl Into<PathBuf>, probe: ProbeSettings) -> Self {
        Self {
            settings,
            benchmarks_dir: benchmarks_dir.into(),
            probe,
        }
    }

    /// `<campaign>/deltadebugging/<key>/<target-basename>`
    pub fn reduction_root(violation: &PotentialViolation, campaign_dir: &Path) -> PathBuf {
        campaign_dir
            .join("deltadebugging")
            .join(violation.key())
            .join(violation.job1.job.target.basename())
    }

    /// Reduces every expected-difference edge of `violation` in turn.
    ///
    /// Stops at the first edge whose directory is already claimed, leaving
    /// that directory untouched.
    pub fn delta_debug(
        &self,
        violation: &PotentialViolation,
        campaign_dir: &Path,
        timeout_minutes: Option<u64>,
    ) -> Result<Vec<ReductionOutcome>, DeltaDebugError> {
        if violation.job1.job.target.sources.is_empty() {
            return Err(DeltaDebugError::Precondition {
                target: violation.job1.job.target.name.clone(),
            });
        }
        let root = Self::reduction_root(violation, campaign_dir);
        info!(key = %violation.key(), edges = violation.expected_diffs.len(), ?root, "delta debugging violation");

        let mut outcomes = Vec::new();
        for (ix, edge) in violation.edges() {
            let dir = root.join(ix.to_string());
            outcomes.push(self.reduce_edge(violation, edge, &dir, timeout_minutes)?);
        }
        Ok(outcomes)
    }

    /// Reduces each violation, logging and skipping those that cannot be reduced.
    pub fn delta_debug_all(
        &self,
        violations: &[PotentialViolation],
        campaign_dir: &Path,
        timeout_minutes: Option<u64>,
    ) -> Vec<ReductionOutcome> {
        let mut outcomes = Vec::new();
        for violation in violations {
            match self.delta_debug(violation, campaign_dir, timeout_minutes) {
                Ok(done) => outcomes.extend(done),
                Err(e @ (DeltaDebugError::Precondition { .. } | DeltaDebugError::Conflict(_))) => {
                    warn!(key = %violation.key(), error = %e, "skipping violation");
                }
                Err(e) => error!(key = %violation.key(), error = %e, "delta debugging failed"),
            }
        }
        outcomes
    }

    fn reduce_edge(
        &self,
        violation: &PotentialViolation,
        edge: DiffEdge,
        dir: &Path,
        timeout_minutes: Option<u64>,
    ) -> Result<ReductionOutcome, DeltaDebugError> {
        claim(dir)?;

        let staged_benchmarks = dir.join("benchmarks");
        copy_tree(&self.benchmarks_dir, &staged_benchmarks)?;
        let mut local = violation.clone();
        let mut target = local.job1.job.target.relocated(&self.benchmarks_dir, &staged_benchmarks);
        if let Ok(absolute) = fs::canonicalize(&self.benchmarks_dir) {
            target = target.relocated(&absolute, &staged_benchmarks);
        }
        debug!(from = ?violation.job1.job.target.name, to = ?target.name, "relocated target");
        local.job1.job.target = target.clone();
        local.job2.job.target = target.clone();

        let violation_file = dir.join(VIOLATION_FILE);
        let edge_file = dir.join(EDGE_FILE);
        Violation::confirm(local.clone()).save(&violation_file)?;
        edge.save(&edge_file)?;

        let build_script = dir.join(BUILD_SCRIPT);
        write_script(&build_script, &self.build_script(&target))?;
        let violation_script = dir.join(VIOLATION_SCRIPT);
        write_script(
            &violation_script,
            &self.violation_script(&violation_file, &edge_file, &target.name, timeout_minutes),
        )?;

        let command = self.shrinker_command(&target, &build_script, &violation_script, &dir.join(SENTINEL));
        info!(?dir, command = %command.join(" "), "running shrinker");
        let shrinker_status = CommandExecutor::new(CommandExecutorConfig {
            command,
            // The shrinker enforces its own --timeout.
            timeout: Duration::MAX,
            working_dir: Some(dir.to_path_buf()),
            stdout_path: Some(dir.join(SHRINKER_OUTPUT)),
        })
        .execute();
        if shrinker_status != ExecutionStatus::Ok {
            warn!(?dir, status = ?shrinker_status, "shrinker did not finish cleanly");
        }

        let archive = dir.join(ARCHIVE_FILE);
        archive::package(&archive, dir, &target, &ArchiveRecord::new(&local, edge.clone()))?;
        Ok(ReductionOutcome {
            directory: dir.to_path_buf(),
            edge,
            shrinker_status,
            archive,
        })
    }

    /// Rebuilds the target after each shrinker edit.
    pub fn build_script(&self, target: &Target) -> String {
        let build = match &target.build_script {
            Some(script) => shell_quote(&script.to_string_lossy()),
            None => self.settings.build_command.clone(),
        };
        let mut script = String::from("#!/bin/sh\nset -e\n");
        if let Some(first) = target.sources.first() {
            let workdir = if first.is_dir() {
                first.as_path()
            } else {
                first.parent().unwrap_or(first.as_path())
            };
            script.push_str(&format!("cd {}\n", shell_quote(&workdir.to_string_lossy())));
        }
        script.push_str(&build);
        script.push('\n');
        script
    }

    /// Exits 0 while the edge is still exhibited by the shrunk target.
    pub fn violation_script(
        &self,
        violation_file: &Path,
        edge_file: &Path,
        target: &Path,
        timeout_minutes: Option<u64>,
    ) -> String {
        let mut args = vec![
            shell_quote(&self.settings.probe_program),
            "--violation".to_string(),
            shell_quote(&violation_file.to_string_lossy()),
            "--edge".to_string(),
            shell_quote(&edge_file.to_string_lossy()),
            "--target".to_string(),
            shell_quote(&target.to_string_lossy()),
            "--tool".to_string(),
            shell_quote(&self.probe.tool),
            "--task".to_string(),
            shell_quote(&self.probe.task),
        ];
        if let Some(minutes) = timeout_minutes {
            args.extend(["--timeout".to_string(), minutes.to_string()]);
        }
        if let Some(truths) = &self.probe.groundtruths {
            args.extend(["--groundtruths".to_string(), shell_quote(&truths.to_string_lossy())]);
        }
        if self.probe.whole_program {
            args.push("--whole-program".to_string());
        }
        if let Some(config) = &self.probe.config {
            args.extend(["--config".to_string(), shell_quote(&config.to_string_lossy())]);
        }
        format!("#!/bin/sh\nexec {}\n", args.join(" "))
    }

    pub fn shrinker_command(
        &self,
        target: &Target,
        build_script: &Path,
        violation_script: &Path,
        log: &Path,
    ) -> Vec<String> {
        let mut cmd = self.settings.shrinker_command.clone();
        for source in &target.sources {
            cmd.push("--sources".to_string());
            cmd.push(source.to_string_lossy().into_owned());
        }
        cmd.push("--target".to_string());
        cmd.push(target.name.to_string_lossy().into_owned());
        cmd.push("--bs".to_string());
        cmd.push(build_script.to_string_lossy().into_owned());
        cmd.push("--vs".to_string());
        cmd.push(violation_script.to_string_lossy().into_owned());
        cmd.push("--logs".to_string());
        cmd.push(log.to_string_lossy().into_owned());
        cmd.extend(self.settings.shrinker_flags.iter().cloned());
        cmd.push("--timeout".to_string());
        cmd.push(self.settings.shrinker_timeout_secs.to_string());
        cmd
    }
}

/// Claims `dir` by creating its sentinel exclusively, then clears anything
/// else a previous, interrupted attempt left behind.
fn claim(dir: &Path) -> Result<(), DeltaDebugError> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    let sentinel = dir.join(SENTINEL);
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&sentinel)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => DeltaDebugError::Conflict(dir.to_path_buf()),
            _ => io_error(&sentinel, e),
        })?;

    for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let path = entry.map_err(|e| io_error(dir, e))?.path();
        if path == sentinel {
            continue;
        }
        info!(?path, "removing stale reduction state");
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| io_error(&path, e))?;
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), DeltaDebugError> {
    fs::create_dir_all(to).map_err(|e| io_error(to, e))?;
    for entry in fs::read_dir(from).map_err(|e| io_error(from, e))? {
        let entry = entry.map_err(|e| io_error(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if entry.file_type().map_err(|e| io_error(&src, e))?.is_dir() {
            copy_tree(&src, &dst)?;
        } else {
            fs::copy(&src, &dst).map_err(|e| io_error(&src, e))?;
        }
    }
    Ok(())
}

fn write_script(path: &Path, content: &str) -> Result<(), DeltaDebugError> {
    fs::write(path, content).map_err(|e| io_error(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| io_error(path, e))?;
    }
    Ok(())
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '='))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// The self-recreation check run by the violation script.
#[derive(Debug, Clone)]
pub struct Probe {
    pub violation: PathBuf,
    /// Without an edge, any difference in the same comparison counts.
    pub edge: Option<PathBuf>,
    pub target: PathBuf,
    pub groundtruths: Option<PathBuf>,
}

impl Probe {
    /// Re-runs both sides of the stored violation against the candidate target
    /// and reports whether the violation, and the edge if given, still shows.
    pub fn reproduce(&self, adapter: &ToolAdapter, options: &OptionSet) -> Result<bool, DeltaDebugError> {
        let snapshot = Violation::load(&self.violation)?.violation;
        let edge = self.edge.as_deref().map(DiffEdge::load).transpose()?;
        info!(violation = ?self.violation, ?edge, "read violation");

        let target = std::path::absolute(&self.target).map_err(|e| io_error(&self.target, e))?;
        let (mut job1, mut job2) = (snapshot.job1.job.clone(), snapshot.job2.job.clone());
        job1.target.name = target.clone();
        job2.target.name = target;

        let mut options = options.clone();
        if !options.contains_key(&snapshot.option) {
            debug!(option = %snapshot.option, "option not configured, using the stored comparison");
            let mut order = PrecisionOrder::new(snapshot.option.as_str());
            order.add_level(&snapshot.more_precise);
            order.add_level(&snapshot.less_precise);
            order.declare_at_least_as_precise(&snapshot.more_precise, &snapshot.less_precise)?;
            options.insert(snapshot.option.clone(), order);
        }
        let mut checker = ViolationChecker::new(options, adapter.reader.clone());
        if let Some(path) = &self.groundtruths {
            checker = checker.with_ground_truths(ViolationChecker::load_ground_truths(path)?);
        }

        let scratch = tempfile::tempdir().map_err(|e| io_error(Path::new("<tempdir>"), e))?;
        let finished = JobScheduler::pair().run_pair(adapter.runner.as_ref(), job1, job2, scratch.path());
        let reproduced = checker.check_violations(&finished).iter().any(|v| {
            v.same_comparison(&snapshot)
                && match &edge {
                    Some(edge) => v.contains_edge(edge),
                    None => !v.expected_diffs.is_empty(),
                }
        });
        if reproduced {
            info!("edge recreated");
        } else {
            info!("edge not recreated");
        }
        Ok(reproduced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaskSettings, ToolSettings};
    use crate::model::{Configuration, FinishedJob, FuzzingJob, Target};
    use crate::option::Level;
    use crate::tool::{CommandLineRunner, LineReader};
    use crate::violation::ViolationKind;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn settings() -> DeltaDebugSettings {
        DeltaDebugSettings {
            shrinker_command: vec!["true".to_string()],
            ..DeltaDebugSettings::default()
        }
    }

    fn probe_settings() -> ProbeSettings {
        ProbeSettings {
            tool: "fake".to_string(),
            task: "cg".to_string(),
            ..ProbeSettings::default()
        }
    }

    fn violation_for(target: Target) -> PotentialViolation {
        let job = |level: &str| {
            let configuration: Configuration =
                [("precision".to_string(), Level::from(level))].into_iter().collect();
            FinishedJob::succeeded(
                FuzzingJob::new(target.clone(), configuration, "fake"),
                0.5,
                PathBuf::from(format!("/out/{level}")),
            )
        };
        PotentialViolation {
            job1: job("high"),
            job2: job("low"),
            option: "precision".to_string(),
            more_precise: "high".into(),
            less_precise: "low".into(),
            kind: ViolationKind::Precision,
            expected_diffs: ["extra:a".to_string()].into_iter().collect(),
        }
    }

    /// `<tmp>/benchmarks/app/{program.txt, src/A.java}`
    fn benchmarks(root: &Path) -> (PathBuf, Target) {
        let bench = root.join("benchmarks");
        fs::create_dir_all(bench.join("app/src")).unwrap();
        fs::write(bench.join("app/program.txt"), "a\nextra:a\n").unwrap();
        fs::write(bench.join("app/src/A.java"), "class A {}").unwrap();
        let target = Target::new(bench.join("app/program.txt"), vec![bench.join("app/src")]);
        (bench, target)
    }

    #[test]
    fn stages_a_private_copy_and_packages_it() {
        let tmp = tempfile::tempdir().unwrap();
        let (bench, target) = benchmarks(tmp.path());
        let campaign = tmp.path().join("campaign");
        let violation = violation_for(target);
        let dd = DeltaDebugger::new(settings(), &bench, probe_settings());

        let outcomes = dd.delta_debug(&violation, &campaign, Some(5)).unwrap();
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.directory, DeltaDebugger::reduction_root(&violation, &campaign).join("0"));
        assert!(outcome.directory.ends_with("program.txt/0"));
        assert_eq!(outcome.shrinker_status, ExecutionStatus::Ok);
        assert!(outcome.archive.exists());

        let dir = &outcome.directory;
        for file in [SENTINEL, VIOLATION_FILE, EDGE_FILE, BUILD_SCRIPT, VIOLATION_SCRIPT] {
            assert!(dir.join(file).exists(), "missing {file}");
        }
        let staged = Violation::load(&dir.join(VIOLATION_FILE)).unwrap().violation;
        assert_eq!(staged.job1.job.target.name, dir.join("benchmarks/app/program.txt"));
        assert_eq!(staged.job2.job.target, staged.job1.job.target);
        assert_eq!(staged.job1.job.target.sources, vec![dir.join("benchmarks/app/src")]);
        assert_eq!(violation.job1.job.target.name, bench.join("app/program.txt"), "original untouched");
        assert_eq!(DiffEdge::load(&dir.join(EDGE_FILE)).unwrap().unit, "extra:a");

        let script = fs::read_to_string(dir.join(VIOLATION_SCRIPT)).unwrap();
        assert!(script.contains("--edge "), "{script}");
        assert!(script.contains(" --target "), "{script}");
        assert!(script.contains("--timeout 5"), "{script}");
        assert!(!script.contains("--whole-program"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for file in [BUILD_SCRIPT, VIOLATION_SCRIPT] {
                let mode = fs::metadata(dir.join(file)).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o700, "{file}");
            }
        }
    }

    #[test]
    fn claimed_directory_makes_a_repeat_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let (bench, target) = benchmarks(tmp.path());
        let campaign = tmp.path().join("campaign");
        let violation = violation_for(target);
        let dd = DeltaDebugger::new(settings(), &bench, probe_settings());
        let first = dd.delta_debug(&violation, &campaign, None).unwrap();
        let archive = fs::read(&first[0].archive).unwrap();

        assert!(matches!(
            dd.delta_debug(&violation, &campaign, None),
            Err(DeltaDebugError::Conflict(_))
        ));
        assert_eq!(fs::read(&first[0].archive).unwrap(), archive);
        assert!(dd.delta_debug_all(&[violation], &campaign, None).is_empty());
    }

    #[test]
    fn stale_state_without_sentinel_is_cleared() {
        let tmp = tempfile::tempdir().unwrap();
        let (bench, target) = benchmarks(tmp.path());
        let campaign = tmp.path().join("campaign");
        let violation = violation_for(target);
        let dir = DeltaDebugger::reduction_root(&violation, &campaign).join("0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ARCHIVE_FILE), "half-written").unwrap();

        let dd = DeltaDebugger::new(settings(), &bench, probe_settings());
        let outcomes = dd.delta_debug(&violation, &campaign, None).unwrap();
        assert_ne!(fs::read(&outcomes[0].archive).unwrap(), b"half-written");
    }

    #[test]
    fn targets_without_sources_are_rejected_before_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let (bench, mut target) = benchmarks(tmp.path());
        target.sources.clear();
        let campaign = tmp.path().join("campaign");
        let dd = DeltaDebugger::new(settings(), &bench, probe_settings());
        assert!(matches!(
            dd.delta_debug(&violation_for(target), &campaign, None),
            Err(DeltaDebugError::Precondition { .. })
        ));
        assert!(!campaign.join("deltadebugging").exists());
    }

    #[test]
    fn same_basename_targets_reduce_in_separate_roots() {
        let campaign = Path::new("/campaign");
        let a = violation_for(Target::new("/bench/a/app.jar", vec![]));
        let b = violation_for(Target::new("/bench/b/app.jar", vec![]));
        let (root_a, root_b) = (
            DeltaDebugger::reduction_root(&a, campaign),
            DeltaDebugger::reduction_root(&b, campaign),
        );
        assert_ne!(root_a, root_b);
        assert!(root_a.ends_with("app.jar"));
    }

    #[test]
    fn shrinker_command_lists_sources_scripts_and_flags() {
        let dd = DeltaDebugger::new(settings(), "/b", probe_settings());
        let target = Target::new("/d/app.jar", vec![PathBuf::from("/d/src1"), PathBuf::from("/d/src2")]);
        let cmd = dd.shrinker_command(&target, Path::new("/d/bs"), Path::new("/d/vs"), Path::new("/d/log.txt"));
        assert_eq!(cmd, vec![
            "true", "--sources", "/d/src1", "--sources", "/d/src2", "--target", "/d/app.jar",
            "--bs", "/d/bs", "--vs", "/d/vs", "--logs", "/d/log.txt", "--hdd", "--class-reduction",
            "--timeout", "120",
        ]);
    }

    #[test]
    fn build_script_prefers_the_targets_own() {
        let dd = DeltaDebugger::new(settings(), "/b", probe_settings());
        let mut target = Target::new("/nowhere/app.jar", vec![PathBuf::from("/nowhere/proj/pom.xml")]);
        let script = dd.build_script(&target);
        assert!(script.contains("cd /nowhere/proj\n"), "{script}");
        assert!(script.ends_with("mvn compile package\n"));
        target.build_script = Some(PathBuf::from("/nowhere/my build.sh"));
        assert!(dd.build_script(&target).ends_with("'/nowhere/my build.sh'\n"));
    }

    #[test]
    fn violation_script_forwards_optional_flags() {
        let probe = ProbeSettings {
            groundtruths: Some(PathBuf::from("/gt.txt")),
            whole_program: true,
            config: Some(PathBuf::from("/etc/monocheck.toml")),
            ..probe_settings()
        };
        let dd = DeltaDebugger::new(settings(), "/b", probe);
        let script = dd.violation_script(Path::new("/d/v.json"), Path::new("/d/e.json"), Path::new("/d/t.jar"), None);
        assert_eq!(
            script,
            "#!/bin/sh\nexec deltadebugger --violation /d/v.json --edge /d/e.json --target /d/t.jar \
             --tool fake --task cg --groundtruths /gt.txt --whole-program --config /etc/monocheck.toml\n"
        );
    }

    fn fake_adapter() -> ToolAdapter {
        let script = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../test_targets/fake_analyzer.sh");
        let settings = ToolSettings {
            command: vec!["/bin/sh".to_string(), script.to_string_lossy().into_owned()],
            input_flag: Some("-i".to_string()),
            output_flag: Some("-o".to_string()),
            option_format: crate::config::default_option_format(),
            timeout_secs: 5,
            whole_program_flag: None,
            tasks: BTreeMap::new(),
        };
        ToolAdapter {
            runner: Arc::new(CommandLineRunner::new(settings, TaskSettings::default())),
            reader: Arc::new(LineReader),
        }
    }

    #[test]
    fn reproduce_tracks_whether_the_edge_survives() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, target) = benchmarks(tmp.path());
        let violation = violation_for(target.clone());
        let violation_file = tmp.path().join(VIOLATION_FILE);
        let edge_file = tmp.path().join(EDGE_FILE);
        Violation::confirm(violation.clone()).save(&violation_file).unwrap();
        let (_, edge) = violation.edges().next().unwrap();
        edge.save(&edge_file).unwrap();

        let probe = Probe {
            violation: violation_file,
            edge: Some(edge_file),
            target: target.name.clone(),
            groundtruths: None,
        };
        let adapter = fake_adapter();
        assert!(probe.reproduce(&adapter, &OptionSet::new()).unwrap());

        fs::write(&target.name, "a\nextra:b\n").unwrap();
        assert!(!probe.reproduce(&adapter, &OptionSet::new()).unwrap(), "edge extra:a is gone");
        let any_edge = Probe { edge: None, ..probe.clone() };
        assert!(any_edge.reproduce(&adapter, &OptionSet::new()).unwrap());

        fs::write(&target.name, "a\n").unwrap();
        assert!(!any_edge.reproduce(&adapter, &OptionSet::new()).unwrap());
    }

    #[test]
    fn reproduce_fails_on_missing_snapshot() {
        let probe = Probe {
            violation: PathBuf::from("/definitely/not/here.json"),
            edge: None,
            target: PathBuf::from("t"),
            groundtruths: None,
        };
        assert!(matches!(
            probe.reproduce(&fake_adapter(), &OptionSet::new()),
            Err(DeltaDebugError::Violation(ViolationError::Io(_)))
        ));
    }
}
