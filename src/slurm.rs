//! Talk to the SLURM scheduler through its command line tools

/// Submit scripts with sbatch and query job state with squeue and sacct
pub mod client;
