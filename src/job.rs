//! Data model for a batch job moving through its lifecycle

/// Immutable description of what to submit: payload, sbatch directives, save directory
pub mod spec;

/// Terminal and transient job states reported by the scheduler
pub mod outcome;

/// Bounded retry budget tracked across attempts
pub mod retry;
