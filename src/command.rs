//! Out-of-process command execution.
//!
//! Everything that shells out (the `merge` utility, shell editors) goes
//! through [`CommandRunner`] so tests can substitute a recording fake.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// Captured result of a command that exited with status 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// The command ran but exited non-zero (or was killed, reported as -1).
    #[error("{command} exited with status {status}")]
    Exit {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("failed to start {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait CommandRunner {
    /// Run `cmd` with `args` in `cwd`, blocking until it exits.
    fn run(&self, cmd: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, cmd: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = cmd, ?args, cwd = %cwd.display(), "running command");
        // output() reads stdout and stderr concurrently until both close.
        let out = Command::new(cmd)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|source| CommandError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        if out.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(CommandError::Exit {
                command: cmd.to_string(),
                status: out.status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        }
    }
}
