use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use crate::job::outcome::{JobOutcome, UNKNOWN_CODE};
use crate::job::retry::RetryState;
use crate::job::spec::{JobSpec, SubmittedJob};
use crate::runner::report::RunReport;
use crate::script::compose::{ComposeError, ScriptComposer};
use crate::slurm::client::{Scheduler, SlurmError};

/// Extra accounting queries allowed while a record is still missing, before
/// the attempt degrades to a failure
pub const STATUS_QUERY_LIMIT: u32 = 3;

/// Failure code recorded when sbatch itself rejects a submission
pub const SUBMISSION_ERROR_CODE: &str = "SUBMISSION_ERROR";

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Pause between squeue polls
    pub wait_interval: Duration,
    /// Pause before re-querying a missing accounting record, deliberately
    /// shorter than the main poll cadence
    pub status_backoff: Duration,
}

impl Default for RunnerOptions {
    fn default() -> RunnerOptions {
        RunnerOptions {
            max_retries: 3,
            wait_interval: Duration::from_secs(10),
            status_backoff: Duration::from_secs(2),
        }
    }
}

/// Drives one job spec to a terminal outcome
///
/// Each attempt walks Composing, Submitted, Polling, Finalizing; a failed
/// attempt loops back to Composing with a fresh script path while retry
/// budget remains. Runners share no state, so independent jobs can run on
/// their own threads without coordination.
pub struct JobRunner<S: Scheduler> {
    scheduler: S,
    composer: ScriptComposer,
    options: RunnerOptions,
}

/// Terminal result of a single attempt
enum Attempt {
    Succeeded(SubmittedJob),
    Failed(String),
}

/// Outcome of a finished job, after Unknown has been resolved away
enum Terminal {
    Succeeded,
    Failed(String),
}

impl<S: Scheduler> JobRunner<S> {
    pub fn new(scheduler: S, composer: ScriptComposer, options: RunnerOptions) -> JobRunner<S> {
        JobRunner {
            scheduler,
            composer,
            options,
        }
    }

    /// Run the spec until it succeeds or the retry budget is exhausted
    ///
    /// Spec and submission problems the scheduler can't fix (a missing
    /// template, an unrunnable squeue binary) abort immediately; everything
    /// else counts against the retry budget.
    pub fn run(&self, spec: &JobSpec) -> Result<RunReport, RunError> {
        let mut retry = RetryState::new(self.options.max_retries);
        let mut scripts: Vec<PathBuf> = Vec::new();

        loop {
            let attempt = retry.attempt();
            info!("[attempt {}] composing job script", attempt + 1);
            let script = self.composer.compose(spec, attempt)?;
            scripts.push(script.path.clone());

            let reason = match self.submit_and_await(&script.path, attempt)? {
                Attempt::Succeeded(job) => {
                    info!("Job {} completed successfully", job.job_id);
                    return Ok(RunReport::Succeeded {
                        job_id: job.job_id,
                        script: job.script,
                    });
                }
                Attempt::Failed(reason) => reason,
            };

            if !retry.record_failure() {
                warn!("Retry budget exhausted, giving up ({reason})");
                return Ok(RunReport::Exhausted {
                    last_reason: reason,
                    scripts,
                });
            }
            info!("Job ended with {reason}, retrying");
        }
    }

    fn submit_and_await(&self, script: &Path, attempt: u32) -> Result<Attempt, RunError> {
        let job_id = match self.scheduler.submit(script) {
            Ok(job_id) => job_id,
            Err(SlurmError::Submission { status, stderr }) => {
                warn!("[attempt {}] sbatch failed with {status}: {stderr}", attempt + 1);
                return Ok(Attempt::Failed(SUBMISSION_ERROR_CODE.to_string()));
            }
            Err(SlurmError::JobIdParse(stdout)) => {
                warn!("[attempt {}] no job id in sbatch output: {stdout:?}", attempt + 1);
                return Ok(Attempt::Failed(SUBMISSION_ERROR_CODE.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let job = SubmittedJob {
            job_id,
            script: script.to_path_buf(),
            submitted_at: Utc::now(),
        };
        info!(
            "[attempt {}] submitted as job {}, waiting for completion",
            attempt + 1,
            job.job_id
        );

        match self.await_outcome(&job)? {
            Terminal::Succeeded => Ok(Attempt::Succeeded(job)),
            Terminal::Failed(code) => Ok(Attempt::Failed(code)),
        }
    }

    /// Poll the queue until the job leaves it, then resolve the terminal
    /// outcome from accounting
    fn await_outcome(&self, job: &SubmittedJob) -> Result<Terminal, SlurmError> {
        loop {
            // Polling: no inherent bound, a job may legitimately sit in the
            // queue for a very long time
            loop {
                thread::sleep(self.options.wait_interval);
                if !self.scheduler.is_running(&job.job_id)? {
                    break;
                }
                info!(
                    "Job {} still in queue, waiting {}s",
                    job.job_id,
                    self.options.wait_interval.as_secs()
                );
            }

            // Finalizing: accounting can lag queue removal, so a missing
            // record gets a bounded number of re-queries
            info!("Job {} left the queue, resolving final status", job.job_id);
            let mut queries = 0;
            loop {
                match self.scheduler.final_status(&job.job_id)? {
                    JobOutcome::Succeeded => return Ok(Terminal::Succeeded),
                    JobOutcome::Failed(code) => return Ok(Terminal::Failed(code)),
                    JobOutcome::StillRunning => {
                        info!("Accounting says job {} is still live, resuming polls", job.job_id);
                        break;
                    }
                    JobOutcome::Unknown => {
                        if queries >= STATUS_QUERY_LIMIT {
                            warn!(
                                "No accounting record for job {} after {} re-queries",
                                job.job_id, STATUS_QUERY_LIMIT
                            );
                            return Ok(Terminal::Failed(UNKNOWN_CODE.to_string()));
                        }
                        queries += 1;
                        info!(
                            "No accounting record for job {} yet, re-querying ({queries}/{STATUS_QUERY_LIMIT})",
                            job.job_id
                        );
                        thread::sleep(self.options.status_backoff);
                    }
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Slurm(#[from] SlurmError),
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::job::spec::{Directives, JobId, JobPayload};

    /// Scripted scheduler: answers come from queues, calls are counted
    struct FakeScheduler {
        accept_submissions: bool,
        submissions: Cell<u32>,
        queue_queries: Cell<u32>,
        status_queries: Cell<u32>,
        /// responses for is_running; empty means "not in queue"
        running: RefCell<VecDeque<bool>>,
        /// responses for final_status; empty means "no accounting record"
        statuses: RefCell<VecDeque<JobOutcome>>,
    }

    impl FakeScheduler {
        fn new(running: Vec<bool>, statuses: Vec<JobOutcome>) -> FakeScheduler {
            FakeScheduler {
                accept_submissions: true,
                submissions: Cell::new(0),
                queue_queries: Cell::new(0),
                status_queries: Cell::new(0),
                running: RefCell::new(running.into()),
                statuses: RefCell::new(statuses.into()),
            }
        }

        fn rejecting() -> FakeScheduler {
            FakeScheduler {
                accept_submissions: false,
                ..FakeScheduler::new(vec![], vec![])
            }
        }
    }

    impl Scheduler for &FakeScheduler {
        fn submit(&self, _script: &Path) -> Result<JobId, SlurmError> {
            self.submissions.set(self.submissions.get() + 1);
            match self.accept_submissions {
                true => Ok(JobId(format!("{}", 1000 + self.submissions.get()))),
                false => Err(SlurmError::JobIdParse("".to_string())),
            }
        }

        fn is_running(&self, _job_id: &JobId) -> Result<bool, SlurmError> {
            self.queue_queries.set(self.queue_queries.get() + 1);
            Ok(self.running.borrow_mut().pop_front().unwrap_or(false))
        }

        fn final_status(&self, _job_id: &JobId) -> Result<JobOutcome, SlurmError> {
            self.status_queries.set(self.status_queries.get() + 1);
            Ok(self
                .statuses
                .borrow_mut()
                .pop_front()
                .unwrap_or(JobOutcome::Unknown))
        }

        fn cancel(&self, _job_id: &JobId) -> Result<(), SlurmError> {
            Ok(())
        }
    }

    fn spec(dir: &TempDir) -> JobSpec {
        JobSpec {
            payload: JobPayload::Function {
                module: "task".to_string(),
                function: "main".to_string(),
                args: vec![],
            },
            directives: Directives::new(),
            save_dir: dir.path().to_path_buf(),
            interpreter: None,
        }
    }

    fn runner(scheduler: &FakeScheduler, max_retries: u32) -> JobRunner<&FakeScheduler> {
        let options = RunnerOptions {
            max_retries,
            wait_interval: Duration::ZERO,
            status_backoff: Duration::ZERO,
        };
        JobRunner::new(scheduler, ScriptComposer, options)
    }

    #[test]
    fn completed_job_succeeds_with_one_submission() {
        let dir = TempDir::new().unwrap();
        let scheduler = FakeScheduler::new(vec![], vec![JobOutcome::Succeeded]);

        let report = runner(&scheduler, 0).run(&spec(&dir)).unwrap();

        assert!(report.succeeded());
        assert_eq!(scheduler.submissions.get(), 1);
    }

    #[test]
    fn failing_job_exhausts_after_max_retries_plus_one_submissions() {
        let dir = TempDir::new().unwrap();
        let failed = JobOutcome::Failed("FAILED".to_string());
        let scheduler =
            FakeScheduler::new(vec![], vec![failed.clone(), failed.clone(), failed]);

        let report = runner(&scheduler, 2).run(&spec(&dir)).unwrap();

        assert_eq!(scheduler.submissions.get(), 3);
        match report {
            RunReport::Exhausted {
                last_reason,
                scripts,
            } => {
                assert_eq!(last_reason, "FAILED");
                assert_eq!(scripts.len(), 3);
                assert_eq!(scripts.iter().collect::<std::collections::HashSet<_>>().len(), 3);
            }
            RunReport::Succeeded { .. } => panic!("run should have exhausted its budget"),
        }
    }

    #[test]
    fn polls_queue_until_job_leaves_it() {
        let dir = TempDir::new().unwrap();
        let scheduler =
            FakeScheduler::new(vec![true, true, true, false], vec![JobOutcome::Succeeded]);

        let report = runner(&scheduler, 0).run(&spec(&dir)).unwrap();

        assert!(report.succeeded());
        assert_eq!(scheduler.queue_queries.get(), 4);
        assert_eq!(scheduler.status_queries.get(), 1);
    }

    #[test]
    fn missing_accounting_record_is_requeried() {
        let dir = TempDir::new().unwrap();
        let scheduler = FakeScheduler::new(
            vec![],
            vec![JobOutcome::Unknown, JobOutcome::Unknown, JobOutcome::Succeeded],
        );

        let report = runner(&scheduler, 0).run(&spec(&dir)).unwrap();

        assert!(report.succeeded());
        assert_eq!(scheduler.status_queries.get(), 3);
    }

    #[test]
    fn persistent_unknown_degrades_to_failure_after_bounded_requeries() {
        let dir = TempDir::new().unwrap();
        let scheduler = FakeScheduler::new(vec![], vec![]);

        let report = runner(&scheduler, 0).run(&spec(&dir)).unwrap();

        assert_eq!(scheduler.status_queries.get(), STATUS_QUERY_LIMIT + 1);
        match report {
            RunReport::Exhausted { last_reason, .. } => assert_eq!(last_reason, UNKNOWN_CODE),
            RunReport::Succeeded { .. } => panic!("unknown status must not end in success"),
        }
    }

    #[test]
    fn accounting_racing_ahead_resumes_polling() {
        let dir = TempDir::new().unwrap();
        let scheduler = FakeScheduler::new(
            vec![false, false],
            vec![JobOutcome::StillRunning, JobOutcome::Succeeded],
        );

        let report = runner(&scheduler, 0).run(&spec(&dir)).unwrap();

        assert!(report.succeeded());
        assert_eq!(scheduler.queue_queries.get(), 2);
        assert_eq!(scheduler.status_queries.get(), 2);
    }

    #[test]
    fn submission_errors_count_against_the_retry_budget() {
        let dir = TempDir::new().unwrap();
        let scheduler = FakeScheduler::rejecting();

        let report = runner(&scheduler, 1).run(&spec(&dir)).unwrap();

        assert_eq!(scheduler.submissions.get(), 2);
        match report {
            RunReport::Exhausted { last_reason, .. } => {
                assert_eq!(last_reason, SUBMISSION_ERROR_CODE)
            }
            RunReport::Succeeded { .. } => panic!("rejected submissions must not succeed"),
        }
    }

    #[test]
    fn missing_template_aborts_without_submitting() {
        let dir = TempDir::new().unwrap();
        let scheduler = FakeScheduler::new(vec![], vec![]);
        let spec = JobSpec {
            payload: JobPayload::Script {
                template: dir.path().join("nope.sh"),
            },
            directives: Directives::new(),
            save_dir: dir.path().to_path_buf(),
            interpreter: None,
        };

        let err = runner(&scheduler, 3).run(&spec).unwrap_err();

        assert!(matches!(
            err,
            RunError::Compose(ComposeError::TemplateNotFound(_))
        ));
        assert_eq!(scheduler.submissions.get(), 0);
    }
}
