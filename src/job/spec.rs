use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What a job actually runs: an existing script, or a synthesized wrapper
/// that imports a module and calls a function with literal arguments
#[derive(Debug, Clone, Serialize)]
pub enum JobPayload {
    Script { template: PathBuf },
    Function {
        module: String,
        function: String,
        args: Vec<String>,
    },
}

/// Everything needed to compose and submit one job
///
/// A JobSpec never changes once built. Retries reuse the same spec and get a
/// fresh script path keyed by attempt number, so earlier artefacts survive.
#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    pub payload: JobPayload,
    pub directives: Directives,
    pub save_dir: PathBuf,
    pub interpreter: Option<PathBuf>,
}

impl JobSpec {
    /// Build a spec from the raw configuration surface, enforcing that exactly
    /// one payload (script template, or module + function) was supplied
    pub fn from_parts(
        script: Option<PathBuf>,
        module: Option<String>,
        function: Option<String>,
        args: Vec<String>,
        directives: Directives,
        save_dir: PathBuf,
        interpreter: Option<PathBuf>,
    ) -> Result<JobSpec, SpecError> {
        let payload = match (script, module, function) {
            (Some(template), None, None) => JobPayload::Script { template },
            (None, Some(module), Some(function)) => JobPayload::Function {
                module,
                function,
                args,
            },
            (None, _, _) => return Err(SpecError::MissingPayload),
            _ => return Err(SpecError::AmbiguousPayload),
        };

        Ok(JobSpec {
            payload,
            directives,
            save_dir,
            interpreter,
        })
    }
}

/// sbatch options rendered into the script header as `#SBATCH --key=value`
///
/// Keys are unique and keep their insertion order. Keys this crate doesn't
/// know about are rendered exactly the same way, so new sbatch options work
/// without a code change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Directives(Vec<(String, String)>);

impl Directives {
    pub fn new() -> Directives {
        Directives(Vec::new())
    }

    /// Set an option, replacing the value in place if the key already exists
    pub fn set(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.0.push((key.to_string(), value.to_string())),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A spec the caller has to fix; never retried
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("invalid job spec: no script template and no (module, function) pair")]
    MissingPayload,
    #[error("invalid job spec: script template and (module, function) are mutually exclusive")]
    AmbiguousPayload,
}

/// Handle assigned by the scheduler at submission, the only key for later queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One accepted submission, owned by the runner driving it
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub script: PathBuf,
    pub submitted_at: DateTime<Utc>,
}
