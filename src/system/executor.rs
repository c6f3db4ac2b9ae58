// src/system/executor.rs

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::constants::{BIN_NAME, EXIT_FAILURE};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{0}' exited with a non-zero error code.")]
    NonZeroExitStatus(String),
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// A fully prepared leaf command: the final command line plus its environment overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// The line handed to the shell, forwarded arguments included.
    pub command_line: String,
    /// Variables layered over the inherited process environment.
    pub env: BTreeMap<String, String>,
    /// Working directory of the child.
    pub cwd: PathBuf,
}

/// Spawns leaf commands. The engine only talks to this seam, so tests can record
/// invocations instead of starting processes.
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion with inherited stdio and returns its exit code.
    fn run(&self, invocation: &CommandInvocation) -> Result<i32, ExecutionError>;
}

/// Runs commands through the platform shell (`sh -c` or `cmd /C`).
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, invocation: &CommandInvocation) -> Result<i32, ExecutionError> {
        let line = invocation.command_line.trim();
        if line.is_empty() {
            return Ok(0); // An empty command is a success, not an error.
        }

        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let status = StdCommand::new(shell)
            .arg(flag)
            .arg(line)
            .current_dir(dunce::simplified(&invocation.cwd))
            .envs(&invocation.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| ExecutionError::CommandFailed(line.to_string(), e))?;

        Ok(exit_code_of(status))
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(EXIT_FAILURE)
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(EXIT_FAILURE)
}

/// Executes a command and captures its standard output.
/// Stderr is passed through to the user's terminal.
pub fn execute_and_capture_output(
    command_line: &str,
    cwd: &Path,
    env_vars: &BTreeMap<String, String>,
) -> Result<String, ExecutionError> {
    let trimmed_command = command_line.trim();
    let parts = shlex::split(trimmed_command)
        .ok_or_else(|| ExecutionError::CommandParse(trimmed_command.to_string()))?;
    let Some((program, args)) = parts.split_first() else {
        return Ok(String::new());
    };

    let command_output = StdCommand::new(program)
        .args(args)
        .current_dir(dunce::simplified(cwd))
        .envs(env_vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| ExecutionError::CommandFailed(trimmed_command.to_string(), e))?;

    if !command_output.status.success() {
        return Err(ExecutionError::NonZeroExitStatus(
            trimmed_command.to_string(),
        ));
    }

    String::from_utf8(command_output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: trimmed_command.to_string(),
        source: e,
    })
}

/// Appends forwarded arguments to a command line, quoted for the target shell.
pub fn join_forwarded_args(command: &str, args: &[String]) -> Result<String, ExecutionError> {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg)?);
    }
    Ok(line)
}

fn quote_arg(arg: &str) -> Result<Cow<'_, str>, ExecutionError> {
    if cfg!(target_os = "windows") {
        if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
            return Ok(Cow::Owned(format!("\"{}\"", arg.replace('"', "\\\""))));
        }
        return Ok(Cow::Borrowed(arg));
    }
    shlex::try_quote(arg).map_err(|_| ExecutionError::CommandParse(arg.to_string()))
}

lazy_static! {
    // A self-invocation followed by a tilde path, at the start of a line or after a separator.
    static ref RELATIVE_INVOCATION: Regex =
        Regex::new(&format!(r"(^|[\s;&|(]){}(\s+)~", regex::escape(BIN_NAME)))
            .expect("relative invocation pattern is valid");
}

/// Rewrites `scriptree ~` into `scriptree \~` so POSIX shells do not expand the tilde
/// into the home directory. Windows shells never expand it and the line is kept as is.
pub fn escape_relative_invocation(command: &str) -> Cow<'_, str> {
    if cfg!(target_os = "windows") {
        return Cow::Borrowed(command);
    }
    RELATIVE_INVOCATION.replace_all(command, format!(r"${{1}}{BIN_NAME}${{2}}\~").as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_forwarded_args_quotes_when_needed() {
        let args = vec!["--watch".to_string(), "two words".to_string()];
        let line = join_forwarded_args("cargo test", &args).unwrap();
        if cfg!(target_os = "windows") {
            assert_eq!(line, "cargo test --watch \"two words\"");
        } else {
            assert_eq!(line, "cargo test --watch 'two words'");
        }
        assert_eq!(join_forwarded_args("ls", &[]).unwrap(), "ls");
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_invocation_is_escaped() {
        assert_eq!(
            escape_relative_invocation("scriptree ~.lint && scriptree ~.test"),
            r"scriptree \~.lint && scriptree \~.test"
        );
        assert_eq!(escape_relative_invocation("echo ~/x"), "echo ~/x");
        assert_eq!(escape_relative_invocation("myscriptree ~"), "myscriptree ~");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_reports_exit_code_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("SCRIPTREE_TEST_VALUE".to_string(), "7".to_string());
        let invocation = CommandInvocation {
            command_line: "exit $SCRIPTREE_TEST_VALUE".to_string(),
            env,
            cwd: dir.path().to_path_buf(),
        };
        assert_eq!(ShellRunner.run(&invocation).unwrap(), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = execute_and_capture_output("echo v20.11.1", dir.path(), &BTreeMap::new()).unwrap();
        assert_eq!(out.trim(), "v20.11.1");
    }
}
