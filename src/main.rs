use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{error, info};

use vilijonkka::job::spec::{Directives, JobSpec};
use vilijonkka::orchestrator;
use vilijonkka::runner::machine::RunnerOptions;

/// Submit a batch job to SLURM, wait for it to finish, and retry failures
#[derive(Parser, Debug)]
#[command(name = "vilijonkka", version, about)]
struct Args {
    /// Path to an existing job script to submit
    #[arg(long, conflicts_with_all = ["module", "function", "arg"])]
    script: Option<PathBuf>,

    /// Python module to import in a synthesized wrapper script
    #[arg(long, requires = "function")]
    module: Option<String>,

    /// Function in --module to call from the wrapper script
    #[arg(long, requires = "module")]
    function: Option<String>,

    /// Literal argument expression passed to --function (repeatable, in order)
    #[arg(long = "arg")]
    arg: Vec<String>,

    /// Directory for per-attempt scripts and logs
    #[arg(long)]
    save_dir: PathBuf,

    /// sbatch directive as key=value, e.g. --sbatch-option partition=small (repeatable)
    #[arg(long = "sbatch-option", value_parser = parse_key_value)]
    sbatch_option: Vec<(String, String)>,

    /// Retries allowed after the first failed attempt
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Seconds between queue polls
    #[arg(long, default_value_t = 10)]
    wait_interval: u64,

    /// Interpreter used in synthesized wrapper scripts
    #[arg(long)]
    python: Option<PathBuf>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Log progress (state transitions, attempts, waits) to stderr
    #[arg(long)]
    verbose: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();
    info!("hyvää päivää! starting up :)");

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool> {
    let mut directives = Directives::new();
    for (key, value) in &args.sbatch_option {
        directives.set(key, value);
    }

    let spec = JobSpec::from_parts(
        args.script,
        args.module,
        args.function,
        args.arg,
        directives,
        args.save_dir,
        args.python,
    )?;
    let options = RunnerOptions {
        max_retries: args.max_retries,
        wait_interval: Duration::from_secs(args.wait_interval),
        ..RunnerOptions::default()
    };

    let report = orchestrator::run_batch(&spec, options)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report.succeeded())
}
