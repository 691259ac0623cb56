//! Drive one job through submit, poll, finalize, and retry

/// The lifecycle state machine
pub mod machine;

/// Final report for a finished run
pub mod report;
