use serde::Serialize;

/// Degraded failure code used when accounting never produced a record
pub const UNKNOWN_CODE: &str = "UNKNOWN";

/// A job state as reported by the scheduler's accounting view
///
/// `Succeeded` and `Failed` are terminal. `StillRunning` means accounting
/// already has a record but the job hasn't finished (the queue query raced
/// it). `Unknown` means accounting has no record yet; callers should query
/// again after a short delay rather than treat it as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    StillRunning,
    Unknown,
}

impl JobOutcome {
    /// Classify a raw sacct State token, e.g. `COMPLETED`, `FAILED`,
    /// `TIMEOUT`, or `CANCELLED by 1234` (only the first word counts)
    pub fn from_state_token(token: &str) -> JobOutcome {
        let state = token.split_whitespace().next().unwrap_or("");
        match state {
            "COMPLETED" => JobOutcome::Succeeded,
            "PENDING" | "RUNNING" | "COMPLETING" | "SUSPENDED" => JobOutcome::StillRunning,
            "" => JobOutcome::Unknown,
            failed => JobOutcome::Failed(failed.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobOutcome::Succeeded | JobOutcome::Failed(_))
    }
}
