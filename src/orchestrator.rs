use std::collections::HashSet;
use std::path::PathBuf;
use std::{fs, thread};

use anyhow::{bail, Result};
use log::{info, warn};

use crate::job::spec::JobSpec;
use crate::runner::machine::{JobRunner, RunnerOptions};
use crate::runner::report::RunReport;
use crate::script::compose::ScriptComposer;
use crate::slurm::client::SlurmCli;
use crate::WorkingDirectory;

/// Run one job spec against the real scheduler and report how it ended
///
/// Creates the save directory, wires the composer and the SLURM client into
/// a runner, and logs the final report. The report itself is returned so the
/// caller decides what to do with it.
pub fn run_batch(spec: &JobSpec, options: RunnerOptions) -> Result<RunReport> {
    let wd = WorkingDirectory {
        path: spec.save_dir.clone(),
    };
    if !wd.path.exists() {
        info!("Creating save directory {}", wd.path.display());
    }
    fs::create_dir_all(&wd.path)?;

    let runner = JobRunner::new(SlurmCli, ScriptComposer, options);
    let report = runner.run(spec)?;

    match &report {
        RunReport::Succeeded { job_id, script } => {
            info!("Job {job_id} succeeded, script kept at {}", script.display());
        }
        RunReport::Exhausted {
            last_reason,
            scripts,
        } => {
            warn!(
                "Job failed ({last_reason}) after {} attempts, scripts kept in {}",
                scripts.len(),
                wd.path.display()
            );
        }
    }

    Ok(report)
}

/// Run many independent jobs, one runner per thread
///
/// Runners share nothing, so the only cross-job requirement is that each
/// spec uses its own save directory; a collision would let attempts from
/// different jobs overwrite each other's artefacts.
pub fn run_all(jobs: Vec<(JobSpec, RunnerOptions)>) -> Result<Vec<RunReport>> {
    let mut save_dirs: HashSet<PathBuf> = HashSet::new();
    for (spec, _) in &jobs {
        if !save_dirs.insert(spec.save_dir.clone()) {
            bail!(
                "save directories must be unique per job, {} is reused",
                spec.save_dir.display()
            );
        }
    }

    thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .iter()
            .map(|(spec, options)| scope.spawn(|| run_batch(spec, options.clone())))
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("runner thread panicked"))
            .collect()
    })
}
