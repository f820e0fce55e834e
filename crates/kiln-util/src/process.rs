//! Forking external build steps such as test and pack commands.

use std::path::Path;
use std::process::Command;

use crate::error::UtilError;

/// What a finished process left behind.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `argv` (program first) in `dir`, adding `env` to the inherited environment.
///
/// # Errors
/// Returns an error if `argv` is empty or the program cannot be started. A
/// non-zero exit is reported through [`ProcessOutput::success`], not as an error.
pub fn run_in(dir: &Path, argv: &[String], env: &[(&str, String)]) -> Result<ProcessOutput, UtilError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(UtilError::EmptyCommand);
    };
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .envs(env.iter().map(|(key, value)| (*key, value.as_str())))
        .output()
        .map_err(|source| UtilError::Spawn {
            program: program.clone(),
            dir: dir.display().to_string(),
            source,
        })?;
    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    })
}
