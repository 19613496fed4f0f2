use crate::model::{FinishedJob, FuzzingJob, JobOutcome};
use crate::tool::Runner;
use crossbeam_channel::unbounded;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use tracing::{debug, info};

/// Lifecycle of a job inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn of(finished: &FinishedJob) -> Self {
        match finished.outcome {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::TimedOut => JobState::TimedOut,
        }
    }
}

/// Executes batches of jobs on a fixed-size pool of worker threads.
///
/// Jobs are handed out through a task queue; each worker owns one tool
/// invocation at a time and reports back over a result channel. A batch call
/// blocks until every job has finished or hit its runner's timeout.
#[derive(Debug, Clone, Copy)]
pub struct JobScheduler {
    workers: usize,
}

impl JobScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// One worker per side of a comparison.
    pub fn pair() -> Self {
        Self::new(2)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every job and returns the finished jobs in submission order.
    ///
    /// A runner that panics is contained to its job, which is reported as failed.
    pub fn run(&self, runner: &dyn Runner, jobs: Vec<FuzzingJob>, output_dir: &Path) -> Vec<FinishedJob> {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }
        let (task_tx, task_rx) = unbounded::<(usize, FuzzingJob)>();
        let (result_tx, result_rx) = unbounded::<(usize, FinishedJob)>();
        for (ix, job) in jobs.into_iter().enumerate() {
            debug!(ix, tool = %job.tool, target = %job.target.basename(), state = ?JobState::Pending, "queued");
            // The receiver is alive until the end of this function.
            let _ = task_tx.send((ix, job));
        }
        drop(task_tx);

        info!(jobs = total, workers = self.workers.min(total), "running batch");
        std::thread::scope(|scope| {
            for worker in 0..self.workers.min(total) {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for (ix, job) in task_rx.iter() {
                        debug!(worker, ix, state = ?JobState::Running, "started");
                        let finished = run_isolated(runner, job, output_dir);
                        debug!(worker, ix, state = ?JobState::of(&finished), elapsed = finished.execution_time, "done");
                        if result_tx.send((ix, finished)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<FinishedJob>> = vec![None; total];
        for (ix, finished) in result_rx.iter() {
            slots[ix] = Some(finished);
        }
        slots.into_iter().flatten().collect()
    }

    /// Runs both sides of a comparison together.
    pub fn run_pair(
        &self,
        runner: &dyn Runner,
        first: FuzzingJob,
        second: FuzzingJob,
        output_dir: &Path,
    ) -> Vec<FinishedJob> {
        self.run(runner, vec![first, second], output_dir)
    }
}

fn run_isolated(runner: &dyn Runner, job: FuzzingJob, output_dir: &Path) -> FinishedJob {
    match catch_unwind(AssertUnwindSafe(|| runner.run_job(&job, output_dir))) {
        Ok(finished) => finished,
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic type".to_string()
            };
            FinishedJob::failed(job, 0.0, JobOutcome::Failed(format!("Runner panicked: {msg}")))
        }
    }
}
