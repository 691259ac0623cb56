use std::path::PathBuf;

use serde::Serialize;

use crate::job::spec::JobId;

/// How a batch run ended
///
/// `Exhausted` keeps every attempted script path so failed runs can be
/// diagnosed attempt by attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunReport {
    Succeeded {
        job_id: JobId,
        script: PathBuf,
    },
    Exhausted {
        last_reason: String,
        scripts: Vec<PathBuf>,
    },
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        matches!(self, RunReport::Succeeded { .. })
    }
}
