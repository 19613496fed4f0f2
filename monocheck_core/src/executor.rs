use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    /// The process ran but exited unsuccessfully.
    Failed(String),
    /// The process could not be started or waited on.
    Other(String),
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    /// When set, the child's stdout is written to this file instead of discarded.
    pub stdout_path: Option<PathBuf>,
}

/// Runs one external command to completion or until its timeout expires.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    /// Runs the configured command. Never panics and never returns an error:
    /// every way the run can go wrong is reported through the status.
    pub fn execute(&self) -> ExecutionStatus {
        let Some((program, args)) = self.config.command.split_first() else {
            return ExecutionStatus::Other("Empty command line".to_string());
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stderr(Stdio::null());
        match &self.config.stdout_path {
            Some(path) => match File::create(path) {
                Ok(f) => {
                    cmd.stdout(Stdio::from(f));
                }
                Err(e) => {
                    return ExecutionStatus::Other(format!(
                        "Failed to create stdout file {path:?}: {e}"
                    ));
                }
            },
            None => {
                cmd.stdout(Stdio::null());
            }
        }

        debug!(command = ?self.config.command, "spawning");
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionStatus::Other(format!(
                    "Failed to spawn command '{:?}': {}",
                    self.config.command, e
                ));
            }
        };

        match self.run_and_wait_with_timeout(child, self.config.timeout) {
            Ok(status) if status.success() => ExecutionStatus::Ok,
            Ok(status) => ExecutionStatus::Failed(describe_exit(&status)),
            Err(status) => status,
        }
    }

    fn run_and_wait_with_timeout(
        &self,
        mut child: Child,
        timeout: Duration,
    ) -> Result<ExitStatus, ExecutionStatus> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        warn!(command = ?self.config.command, ?timeout, "command timed out, killing");
                        if let Err(e) = child.kill() {
                            return Err(ExecutionStatus::Other(format!(
                                "Failed to kill timed-out process: {e}",
                            )));
                        }
                        let _ = child.wait();
                        return Err(ExecutionStatus::Timeout);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(ExecutionStatus::Other(format!(
                        "Error waiting for child: {e}",
                    )));
                }
            }
        }
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Terminated by signal {signal}");
        }
    }
    "Exited abnormally".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_target_path(name: &str) -> PathBuf {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.join("../test_targets").join(name)
    }

    fn sh(script: &str, args: &[&str], timeout: Duration) -> CommandExecutorConfig {
        let target_path = get_test_target_path(script);
        if !target_path.exists() {
            panic!("Test target missing: {target_path:?}");
        }
        let mut command = vec!["/bin/sh".to_string(), target_path.to_string_lossy().into_owned()];
        command.extend(args.iter().map(|a| a.to_string()));
        CommandExecutorConfig {
            command,
            timeout,
            working_dir: None,
            stdout_path: None,
        }
    }

    #[test]
    fn successful_run_is_ok() {
        let executor = CommandExecutor::new(sh("exit_with.sh", &["0"], Duration::from_secs(5)));
        assert_eq!(executor.execute(), ExecutionStatus::Ok);
    }

    #[test]
    fn non_zero_exit_is_failed() {
        let executor = CommandExecutor::new(sh("exit_with.sh", &["3"], Duration::from_secs(5)));
        match executor.execute() {
            ExecutionStatus::Failed(desc) => assert!(desc.contains("code 3"), "{desc}"),
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let executor = CommandExecutor::new(sh("sleep_for.sh", &["5"], Duration::from_millis(100)));
        let started = Instant::now();
        assert_eq!(executor.execute(), ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(4), "child was not killed promptly");
    }

    #[test]
    fn stdout_is_captured_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stdout.txt");
        let mut config = sh("exit_with.sh", &["0"], Duration::from_secs(5));
        config.stdout_path = Some(out.clone());
        assert_eq!(CommandExecutor::new(config).execute(), ExecutionStatus::Ok);
        let written = std::fs::read_to_string(out).unwrap();
        assert!(written.contains("exiting with 0"), "{written}");
    }

    #[test]
    fn missing_program_is_other() {
        let executor = CommandExecutor::new(CommandExecutorConfig {
            command: vec!["./this_command_does_not_exist_ever_12345.sh".to_string()],
            timeout: Duration::from_secs(1),
            working_dir: None,
            stdout_path: None,
        });
        match executor.execute() {
            ExecutionStatus::Other(msg) => assert!(msg.contains("Failed to spawn command")),
            other => panic!("Expected Other, got {other:?}"),
        }
    }

    #[test]
    fn empty_command_is_other() {
        let executor = CommandExecutor::new(CommandExecutorConfig {
            command: vec![],
            timeout: Duration::from_secs(1),
            working_dir: None,
            stdout_path: None,
        });
        assert!(matches!(executor.execute(), ExecutionStatus::Other(_)));
    }
}
