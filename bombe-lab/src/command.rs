//! External command execution.
//!
//! Every collaborator program (trainer, decoder, vocabulary builder) is run
//! through [`run`]: output is captured, and a non-zero exit becomes
//! [`LabError::CommandFailed`] carrying the exact invocation and its stderr.

use crate::error::LabError;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// `--flag value`.
    pub fn opt(self, flag: &str, value: impl fmt::Display) -> Self {
        self.arg(flag).arg(value.to_string())
    }

    /// `--flag <path>`.
    pub fn opt_path(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).path_arg(path)
    }

    /// `--flag <path> <path> ...`.
    pub fn opt_paths<P: AsRef<Path>>(mut self, flag: &str, paths: &[P]) -> Self {
        self = self.arg(flag);
        for path in paths {
            self = self.path_arg(path.as_ref());
        }
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Run `spec` to completion and return its trimmed stdout.
pub async fn run(spec: &CommandSpec) -> Result<String, LabError> {
    debug!(command = %spec, "Running external command");

    let output = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| LabError::Spawn {
            command: spec.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(LabError::CommandFailed {
            command: spec.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_display_joins_arguments() {
        let spec = CommandSpec::new("marian")
            .opt_path("--config", Path::new("/cfg/engine.yml"))
            .opt_paths(
                "--train-sets",
                &[PathBuf::from("a.en"), PathBuf::from("a.cy")],
            )
            .opt("--beam-size", 6);
        assert_eq!(
            spec.to_string(),
            "marian --config /cfg/engine.yml --train-sets a.en a.cy --beam-size 6"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = run(&CommandSpec::new("sh").arg("-c").arg("echo hello"))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr_and_command() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo boom >&2; exit 3");
        match run(&spec).await {
            Err(LabError::CommandFailed {
                command, stderr, ..
            }) => {
                assert_eq!(stderr, "boom");
                assert!(command.starts_with("sh -c"));
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let result = run(&CommandSpec::new("bombe-no-such-program-xyz")).await;
        assert!(matches!(result, Err(LabError::Spawn { .. })));
    }
}
