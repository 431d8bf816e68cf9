//! Command execution utilities for scheduler queries.

use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
    #[error("Failed to read output of {command}: {error}")]
    Read { command: String, error: String },
}

/// Execute a command and return stdout as a string.
///
/// Non-zero exit status is reported as [`CommandError::Failed`] carrying
/// the command's stderr.
pub async fn run_command(cmd: &mut Command, name: &str) -> Result<String, CommandError> {
    let output = cmd.output().await.map_err(|e| CommandError::Execution {
        command: name.to_string(),
        error: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CommandError::Failed {
            command: name.to_string(),
            stderr: stderr.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Stdout of a running child process, read one line at a time.
///
/// Long-running accounting queries can produce millions of lines, so the
/// output is never buffered wholesale.
pub struct CommandLines {
    name: String,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl CommandLines {
    /// Read the next line of stdout, or `None` once the stream is exhausted.
    pub async fn next_line(&mut self) -> Result<Option<String>, CommandError> {
        self.lines.next_line().await.map_err(|e| CommandError::Read {
            command: self.name.clone(),
            error: e.to_string(),
        })
    }

    /// Wait for the child to exit and check its status.
    pub async fn finish(&mut self) -> Result<(), CommandError> {
        let status = self.child.wait().await.map_err(|e| CommandError::Execution {
            command: self.name.clone(),
            error: e.to_string(),
        })?;
        if !status.success() {
            return Err(CommandError::Failed {
                command: self.name.clone(),
                stderr: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

/// Spawn a command with piped stdout and return a line stream over it.
pub fn spawn_lines(cmd: &mut Command, name: &str) -> Result<CommandLines, CommandError> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CommandError::Execution {
            command: name.to_string(),
            error: e.to_string(),
        })?;

    let stdout = child.stdout.take().ok_or_else(|| CommandError::Execution {
        command: name.to_string(),
        error: "stdout was not captured".to_string(),
    })?;

    Ok(CommandLines {
        name: name.to_string(),
        child,
        lines: BufReader::new(stdout).lines(),
    })
}
