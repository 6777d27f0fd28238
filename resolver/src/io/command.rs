//! Command runner abstraction for shell execution.
//!
//! The [`CommandRunner`] trait decouples the applier from the host shell.
//! Tests use scripted runners that return predetermined results without
//! spawning processes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::outcome::judge_output;
use crate::io::process::{run_command_with_timeout, shell_command};

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Normalized outcome of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Exit code zero and no failure marker in the output.
    Success,
    /// Non-zero exit, a failure marker, or the command could not be started.
    Failed,
    /// Killed after exceeding its timeout.
    TimedOut,
}

/// Result of running one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: CommandStatus,
    /// Combined stdout + stderr.
    pub output: String,
    /// `None` when the process produced no exit code.
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    pub fn timed_out(&self) -> bool {
        self.status == CommandStatus::TimedOut
    }
}

/// Abstraction over command execution backends.
///
/// Implementations never fail: anything that goes wrong is reported as a
/// [`CommandStatus::Failed`] result carrying the error text.
pub trait CommandRunner {
    fn run(&self, command: &str, timeout: Duration) -> CommandResult;
}

/// Runner that executes commands through the host shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    output_limit_bytes: usize,
}

impl ShellRunner {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(command = %command, timeout_secs = timeout.as_secs()))]
    fn run(&self, command: &str, timeout: Duration) -> CommandResult {
        let output = match run_command_with_timeout(
            shell_command(command),
            None,
            timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "command could not be run");
                return CommandResult {
                    status: CommandStatus::Failed,
                    output: format!("{err:#}"),
                    exit_code: None,
                };
            }
        };

        let mut combined = output.combined();
        let exit_code = output.exit_code();
        let status = if output.timed_out {
            combined.push_str(&format!(
                "\n[command timed out after {}s]\n",
                timeout.as_secs()
            ));
            CommandStatus::TimedOut
        } else if judge_output(exit_code, &combined) {
            CommandStatus::Success
        } else {
            CommandStatus::Failed
        };

        info!(?status, ?exit_code, "command finished");
        CommandResult {
            status,
            output: combined,
            exit_code,
        }
    }
}
