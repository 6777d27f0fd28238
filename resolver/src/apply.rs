//! Application of a single recommended solution.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::Solution;
use crate::io::command::{CommandResult, CommandRunner, DEFAULT_COMMAND_TIMEOUT};
use crate::session::ResolutionSession;

/// Execution settings shared by every solution in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyConfig {
    pub command_timeout: Duration,
    /// Pause after each undo and main command, so package-manager locks on
    /// the shared environment are released before the next command.
    pub command_pause: Duration,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            command_pause: Duration::from_secs(1),
        }
    }
}

/// A command that failed while applying a solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCommand {
    pub command: String,
    pub output: String,
    pub exit_code: Option<i32>,
}

impl FailedCommand {
    fn from_result(command: &str, result: &CommandResult) -> Self {
        Self {
            command: command.to_string(),
            output: result.output.clone(),
            exit_code: result.exit_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every main command (and the verification command, if any) succeeded.
    Succeeded,
    Failed,
    /// Not a `commands` solution; nothing was applied and it does not count
    /// as a failed attempt.
    NotApplicable,
}

/// Result of applying one solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub outcome: ApplyOutcome,
    /// A verification command ran and passed.
    pub verified: bool,
    pub failed_commands: Vec<FailedCommand>,
}

impl ApplyReport {
    fn not_applicable() -> Self {
        Self {
            outcome: ApplyOutcome::NotApplicable,
            verified: false,
            failed_commands: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == ApplyOutcome::Succeeded
    }
}

/// Apply `solution` as attempt number `ordinal`.
///
/// The attempt is recorded in the ledger before anything runs. Undo commands
/// are best-effort. Every main command runs even after an earlier one fails;
/// any failure marks the solution failed. A passing verification command is
/// the only thing here that sets `session.solved`.
#[instrument(skip_all, fields(ordinal, priority = solution.priority))]
pub fn apply_solution<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &ApplyConfig,
    session: &mut ResolutionSession,
    solution: &Solution,
    ordinal: u32,
) -> ApplyReport {
    session.ledger.record_attempt(solution, ordinal);
    info!(description = %solution.description, "applying solution");

    // TODO: track which undo commands failed so a partial rollback can block
    // the main commands instead of running them on a half-reverted environment.
    for command in &solution.undo_commands {
        let result = session.ledger.execute(
            runner,
            command,
            "Undo previous changes",
            config.command_timeout,
        );
        if !result.success() {
            warn!(command = %command, status = ?result.status, "undo command failed, continuing");
        }
        pause(config.command_pause);
    }

    if !solution.is_actionable() {
        debug!(
            solution_type = solution.solution_type.as_str(),
            "skipping non-command solution"
        );
        return ApplyReport::not_applicable();
    }

    if solution.commands.is_empty() {
        warn!("solution has no commands to execute");
        return ApplyReport {
            outcome: ApplyOutcome::Failed,
            verified: false,
            failed_commands: Vec::new(),
        };
    }

    let mut failed_commands = Vec::new();
    for command in &solution.commands {
        let result = session
            .ledger
            .execute(runner, command, "", config.command_timeout);
        if !result.success() {
            warn!(command = %command, status = ?result.status, "solution command failed");
            failed_commands.push(FailedCommand::from_result(command, &result));
        }
        pause(config.command_pause);
    }

    if !failed_commands.is_empty() {
        return ApplyReport {
            outcome: ApplyOutcome::Failed,
            verified: false,
            failed_commands,
        };
    }

    let Some(verification) = solution.verification() else {
        return ApplyReport {
            outcome: ApplyOutcome::Succeeded,
            verified: false,
            failed_commands,
        };
    };

    let result = session.ledger.execute(
        runner,
        verification,
        "Verify solution",
        config.command_timeout,
    );
    if result.success() {
        info!("verification passed");
        session.solved = true;
        ApplyReport {
            outcome: ApplyOutcome::Succeeded,
            verified: true,
            failed_commands,
        }
    } else {
        warn!(status = ?result.status, "verification failed");
        failed_commands.push(FailedCommand::from_result(verification, &result));
        ApplyReport {
            outcome: ApplyOutcome::Failed,
            verified: false,
            failed_commands,
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
