use std::path::PathBuf;

pub mod job;
pub mod orchestrator;
pub mod runner;
pub mod script;
pub mod slurm;

/// A directory that holds every artefact of one batch run: one script and
/// one log per attempt, named by attempt index so scripts, job ids, and logs
/// can be matched up after the fact
pub struct WorkingDirectory {
    pub path: PathBuf,
}
