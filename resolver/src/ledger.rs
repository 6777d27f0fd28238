//! Append-only record of everything a resolution run executed.
//!
//! The ledger never deduplicates or reorders. Its history is handed to the
//! oracle on escalation so the oracle can avoid repeating failed strategies;
//! nothing here refuses a repeated attempt.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Solution;
use crate::io::command::{CommandResult, CommandRunner};

/// One executed command (undo, main, verification or final check).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub command: String,
    pub success: bool,
    pub combined_output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub timestamp: String,
    pub description: String,
}

/// One attempted solution, recorded before any of its commands run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionHistoryEntry {
    pub ordinal: u32,
    pub description: String,
    pub commands: Vec<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    execution_log: Vec<ExecutionLogEntry>,
    solution_history: Vec<SolutionHistoryEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self, solution: &Solution, ordinal: u32) -> SolutionHistoryEntry {
        let entry = SolutionHistoryEntry {
            ordinal,
            description: solution.description.clone(),
            commands: solution.commands.clone(),
            timestamp: now_timestamp(),
        };
        debug!(ordinal, history_len = self.solution_history.len() + 1, "recorded attempt");
        self.solution_history.push(entry.clone());
        entry
    }

    pub fn record_command(&mut self, entry: ExecutionLogEntry) {
        self.execution_log.push(entry);
    }

    /// Run `command` through `runner` and record the result.
    ///
    /// All command execution in a resolution run goes through here.
    pub fn execute<R: CommandRunner + ?Sized>(
        &mut self,
        runner: &R,
        command: &str,
        description: &str,
        timeout: Duration,
    ) -> CommandResult {
        let result = runner.run(command, timeout);
        self.record_command(ExecutionLogEntry {
            command: command.to_string(),
            success: result.success(),
            combined_output: result.output.clone(),
            exit_code: result.exit_code,
            timed_out: result.timed_out(),
            timestamp: now_timestamp(),
            description: description.to_string(),
        });
        result
    }

    /// The most recent `n` attempts, oldest first.
    pub fn recent_history(&self, n: usize) -> &[SolutionHistoryEntry] {
        let start = self.solution_history.len().saturating_sub(n);
        &self.solution_history[start..]
    }

    pub fn execution_log(&self) -> &[ExecutionLogEntry] {
        &self.execution_log
    }

    pub fn solution_history(&self) -> &[SolutionHistoryEntry] {
        &self.solution_history
    }

    pub fn successful_commands(&self) -> usize {
        self.execution_log.iter().filter(|entry| entry.success).count()
    }
}

/// Wall-clock timestamp used in every persisted artifact (RFC 3339, UTC).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
