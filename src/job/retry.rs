/// Retry budget for one batch run
///
/// Created when the run starts and dropped when it ends. `max_retries` is the
/// number of retries after the first attempt, so a run makes at most
/// `max_retries + 1` submissions. With `max_retries == 0` a single failure
/// exhausts the budget immediately.
#[derive(Debug)]
pub struct RetryState {
    attempts_made: u32,
    max_retries: u32,
}

impl RetryState {
    pub fn new(max_retries: u32) -> RetryState {
        RetryState {
            attempts_made: 0,
            max_retries,
        }
    }

    /// Zero-based index of the attempt currently in flight, used to key
    /// script and log paths
    pub fn attempt(&self) -> u32 {
        self.attempts_made
    }

    /// Record a failed terminal outcome; returns true if another attempt may
    /// be made
    pub fn record_failure(&mut self) -> bool {
        self.attempts_made += 1;
        self.attempts_made <= self.max_retries
    }
}
