//! Compose submittable job scripts and persist them per attempt

/// Splice sbatch directives into script templates, or synthesize a wrapper
/// script that calls a module function
pub mod compose;
