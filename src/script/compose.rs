use std::path::{Path, PathBuf};
use std::{env, fs, io};

use log::info;
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::job::spec::{Directives, JobPayload, JobSpec};

/// A job script written to disk, ready for sbatch
///
/// The path is keyed by attempt number (`attempt_<n>.sh`), so retries never
/// clobber the scripts of earlier attempts.
#[derive(Debug)]
pub struct ComposedScript {
    pub path: PathBuf,
    pub text: String,
}

/// Turns a JobSpec into a submittable script file
///
/// Composing the same spec twice produces identical text apart from the
/// attempt-indexed paths baked into it.
pub struct ScriptComposer;

impl ScriptComposer {
    pub fn compose(&self, spec: &JobSpec, attempt: u32) -> Result<ComposedScript, ComposeError> {
        let script_path = spec.save_dir.join(format!("attempt_{attempt}.sh"));
        let log_path = spec.save_dir.join(format!("attempt_{attempt}.log"));

        let text = match &spec.payload {
            JobPayload::Script { template } => splice_template(spec, template, &log_path)?,
            JobPayload::Function {
                module,
                function,
                args,
            } => render_wrapper(spec, module, function, args, &log_path)?,
        };

        fs::write(&script_path, &text)?;
        info!("Wrote job script to {}", script_path.display());
        Ok(ComposedScript {
            path: script_path,
            text,
        })
    }
}

/// Keep the template's interpreter line, replace any existing `#SBATCH`
/// header block with the spec's directives, and leave the body untouched
fn splice_template(
    spec: &JobSpec,
    template: &Path,
    log_path: &Path,
) -> Result<String, ComposeError> {
    let source = match fs::read_to_string(template) {
        Ok(source) => source,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ComposeError::TemplateNotFound(template.to_path_buf()))
        }
        Err(err) => return Err(err.into()),
    };

    let mut directives = spec.directives.clone();
    if !directives.contains("output") {
        directives.set("output", &log_path.display().to_string());
    }

    let mut lines = source.lines().peekable();
    let shebang = match lines.next_if(|line| line.starts_with("#!")) {
        Some(line) => line.to_string(),
        None => "#!/bin/bash".to_string(),
    };
    while lines
        .next_if(|line| line.trim().is_empty() || line.starts_with("#SBATCH"))
        .is_some()
    {}
    let body: Vec<&str> = lines.collect();

    Ok(format!(
        "{shebang}\n{}\n\n{}\n",
        render_directives(&directives),
        body.join("\n")
    ))
}

/// Rendering context for the wrapper template
#[derive(Serialize)]
struct WrapperContext {
    directives: String,
    interpreter: String,
    module: String,
    function: String,
    args: String,
    log: String,
}

/// Synthesize a script that imports a module and calls a function with the
/// given literal arguments, output redirected to the attempt's log file
///
/// Argument values are inserted verbatim; a malformed literal only fails
/// when the job runs.
fn render_wrapper(
    spec: &JobSpec,
    module: &str,
    function: &str,
    args: &[String],
    log_path: &Path,
) -> Result<String, ComposeError> {
    /// included wrapper template
    static WRAPPER: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/data/templates/wrapper.txt"
    ));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("wrapper", WRAPPER)?;

    let context = WrapperContext {
        directives: render_directives(&spec.directives),
        interpreter: interpreter_path(spec),
        module: module.to_string(),
        function: function.to_string(),
        args: args.join(", "),
        log: log_path.display().to_string(),
    };

    Ok(tt.render("wrapper", &context)?)
}

/// Explicit override from the spec, else the PYTHON environment variable,
/// else whatever python3 is on the job node's PATH
fn interpreter_path(spec: &JobSpec) -> String {
    spec.interpreter
        .as_ref()
        .map(|path| path.display().to_string())
        .or_else(|| env::var("PYTHON").ok())
        .unwrap_or_else(|| "python3".to_string())
}

fn render_directives(directives: &Directives) -> String {
    let lines: Vec<String> = directives
        .iter()
        .map(|(key, value)| format!("#SBATCH --{key}={value}"))
        .collect();
    lines.join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("script template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    #[error("can't write job script: {0}")]
    Io(#[from] io::Error),
    #[error("can't render wrapper template: {0}")]
    Render(#[from] tinytemplate::error::Error),
}
