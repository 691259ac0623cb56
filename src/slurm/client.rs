use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Output};

use log::{debug, info};

use crate::job::outcome::JobOutcome;
use crate::job::spec::JobId;

/// The three scheduler operations the job lifecycle needs, plus a cancel
/// hook for hosts that have to tear a run down early
///
/// Everything the runner knows about the cluster goes through this trait, so
/// the retry state machine can be driven by a fake scheduler in tests.
pub trait Scheduler {
    /// Submit a job script, returning the scheduler-assigned job id
    fn submit(&self, script: &Path) -> Result<JobId, SlurmError>;

    /// True while the job is in the live queue (pending or running). False
    /// only means the job has left the queue, not that it succeeded.
    fn is_running(&self, job_id: &JobId) -> Result<bool, SlurmError>;

    /// Terminal state from the accounting view. Accounting lags queue
    /// removal, so this can report `Unknown` shortly after a job finishes.
    fn final_status(&self, job_id: &JobId) -> Result<JobOutcome, SlurmError>;

    fn cancel(&self, job_id: &JobId) -> Result<(), SlurmError>;
}

/// Scheduler backed by the sbatch / squeue / sacct / scancel binaries on PATH
pub struct SlurmCli;

impl Scheduler for SlurmCli {
    fn submit(&self, script: &Path) -> Result<JobId, SlurmError> {
        let script = script.display().to_string();
        info!("Running sbatch for {script}");
        let output = run("sbatch", &["--parsable", &script])?;

        if !output.status.success() {
            return Err(SlurmError::Submission {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_job_id(&stdout).ok_or_else(|| SlurmError::JobIdParse(stdout.trim().to_string()))
    }

    fn is_running(&self, job_id: &JobId) -> Result<bool, SlurmError> {
        // squeue exits non-zero for ids already purged from the queue, which
        // means the same thing as an empty listing here
        let output = run(
            "squeue",
            &["--job", &job_id.0, "--noheader", "--format=%i"],
        )?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(queue_contains(&stdout, job_id))
    }

    fn final_status(&self, job_id: &JobId) -> Result<JobOutcome, SlurmError> {
        let output = run(
            "sacct",
            &[
                "-j",
                &job_id.0,
                "--format=JobID,State",
                "--parsable2",
                "--noheader",
            ],
        )?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_final_status(&stdout, job_id))
    }

    fn cancel(&self, job_id: &JobId) -> Result<(), SlurmError> {
        info!("Cancelling job {job_id}");
        let output = run("scancel", &[&job_id.0])?;
        if !output.status.success() {
            return Err(SlurmError::Cancel {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn run(program: &str, args: &[&str]) -> Result<Output, SlurmError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    debug!("{:?}", &cmd);
    cmd.output().map_err(|source| SlurmError::Exec {
        program: program.to_string(),
        source,
    })
}

/// Pull the job id out of sbatch output: either the bare `--parsable` form
/// (`12345` or `12345;cluster`) or the classic `Submitted batch job 12345`
pub fn parse_job_id(stdout: &str) -> Option<JobId> {
    let digits: String = stdout
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.is_empty() {
        true => None,
        false => Some(JobId(digits)),
    }
}

/// A job is live iff its id appears as a row in the filtered squeue listing
pub fn queue_contains(stdout: &str, job_id: &JobId) -> bool {
    stdout.lines().any(|line| line.trim() == job_id.0)
}

/// Find the accounting row for the job itself (steps like `12345.batch` are
/// ignored) in pipe-delimited sacct output and classify its State field
pub fn parse_final_status(stdout: &str, job_id: &JobId) -> JobOutcome {
    for line in stdout.lines() {
        let mut fields = line.split('|');
        if fields.next() == Some(job_id.0.as_str()) {
            let state = fields.next().unwrap_or("");
            return JobOutcome::from_state_token(state);
        }
    }
    JobOutcome::Unknown
}

#[derive(Debug, thiserror::Error)]
pub enum SlurmError {
    #[error("sbatch exited with {status}: {stderr}")]
    Submission { status: ExitStatus, stderr: String },
    #[error("no job id in sbatch output: {0:?}")]
    JobIdParse(String),
    #[error("scancel exited with {status}: {stderr}")]
    Cancel { status: ExitStatus, stderr: String },
    #[error("can't run {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },
}
