//! External command execution.
//!
//! Every external tool the pipeline touches (`xcrun`, `tar`, `git`, `make`,
//! the upstream `configure`, `lipo`, `xcodebuild`) goes through the
//! [`CommandRunner`] trait. The orchestrator never inspects a tool's internals:
//! an argument list goes in, an exit status and captured output come out.
//!
//! [`SystemRunner`] is the real implementation. Tests substitute a recording
//! runner to observe the exact commands issued and to simulate their effects.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::types::{BuildError, Stage};

/// A fully described external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Environment overrides layered on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// The command line as a single string, for logs and error messages.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_line())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Narrow interface to black-box external tools.
///
/// Implementations return `Err` only when the command could not be started;
/// a non-zero exit is a normal [`CommandOutput`].
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BuildError>;
}

/// Runs commands with [`std::process::Command`], blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BuildError> {
        log::debug!("$ {}", spec.display_line());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.envs(&spec.env);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BuildError::MissingTool {
                    tool: spec.program.clone(),
                    context: format!("`{}`", spec.display_line()),
                }
            } else {
                BuildError::Io(e)
            }
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs a command and converts a non-zero exit into `stage`'s error.
///
/// The error carries the exit code, the command line and the tail of the
/// captured output so the failure is diagnosable without re-running.
pub fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    stage: Stage,
    context: &str,
) -> Result<CommandOutput, BuildError> {
    let output = runner.run(spec)?;
    if !output.success() {
        return Err(stage.error(
            context,
            format!(
                "`{}` failed (exit status: {}).\n\nStdout:\n{}\n\nStderr:\n{}",
                spec.display_line(),
                output
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "terminated by signal".to_string()),
                tail(&output.stdout, 20),
                tail(&output.stderr, 20)
            ),
            output.code,
        ));
    }
    Ok(output)
}

/// Last `lines` lines of a tool's output.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_line_quotes_spaces() {
        let spec = CommandSpec::new("configure")
            .arg("--prefix=/tmp/out")
            .arg("CFLAGS=-O2 -g");
        assert_eq!(
            spec.display_line(),
            "configure --prefix=/tmp/out 'CFLAGS=-O2 -g'"
        );
    }

    #[test]
    fn test_system_runner_missing_program() {
        let spec = CommandSpec::new("xcforge-nonexistent-command-12345");
        let err = SystemRunner.run(&spec).unwrap_err();
        assert!(matches!(err, BuildError::MissingTool { ref tool, .. } if tool == "xcforge-nonexistent-command-12345"));
        assert!(err.is_configuration());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_checked_reports_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = run_checked(&SystemRunner, &spec, Stage::Build, "alpha (arm64-device)").unwrap_err();
        assert_eq!(err.exit_code(), 3);
        let msg = err.to_string();
        assert!(msg.contains("alpha (arm64-device)"));
        assert!(msg.contains("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_passes_env_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "printf '%s' \"$XCFORGE_TEST\"; pwd >/dev/null"])
            .env("XCFORGE_TEST", "hello")
            .current_dir(dir.path());
        let output = SystemRunner.run(&spec).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello");
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("", 5), "");
    }
}
