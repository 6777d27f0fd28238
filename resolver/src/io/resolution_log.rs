//! Persisted artifacts of a resolution run.
//!
//! The resolution log is written once when the loop reaches a terminal state;
//! consultation records are written per oracle call. Both are pretty-printed
//! JSON with a trailing newline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::ledger::{ExecutionLogEntry, SolutionHistoryEntry, now_timestamp};
use crate::session::ResolutionSession;

/// Default resolution log path.
pub const DEFAULT_LOG_FILE: &str = "resolution_log.json";

/// `resolution_status` values in the persisted log.
pub const STATUS_SOLVED: &str = "SOLVED";
pub const STATUS_INCOMPLETE: &str = "INCOMPLETE";

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionLog<'a> {
    pub diagnosis_file: String,
    pub timestamp: String,
    pub resolution_status: &'static str,
    /// `SOLVED`, `EXHAUSTED` or `STOPPED`.
    pub terminal_state: &'a str,
    pub reason: String,
    pub iterations: u32,
    pub consecutive_failures: u32,
    pub ai_consultations: u32,
    pub web_searches: u32,
    pub total_commands: usize,
    pub successful_commands: usize,
    pub solution_history: &'a [SolutionHistoryEntry],
    pub execution_log: &'a [ExecutionLogEntry],
}

impl<'a> ResolutionLog<'a> {
    pub fn new(
        diagnosis_file: &Path,
        terminal_state: &'a str,
        reason: String,
        session: &'a ResolutionSession,
    ) -> Self {
        Self {
            diagnosis_file: diagnosis_file.display().to_string(),
            timestamp: now_timestamp(),
            resolution_status: if session.solved {
                STATUS_SOLVED
            } else {
                STATUS_INCOMPLETE
            },
            terminal_state,
            reason,
            iterations: session.iteration,
            consecutive_failures: session.consecutive_failures,
            ai_consultations: session.ai_consultation_count,
            web_searches: session.web_search_count,
            total_commands: session.ledger.execution_log().len(),
            successful_commands: session.ledger.successful_commands(),
            solution_history: session.ledger.solution_history(),
            execution_log: session.ledger.execution_log(),
        }
    }
}

pub fn write_resolution_log(path: &Path, log: &ResolutionLog<'_>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    write_json(path, log)
}

/// How an oracle response was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStatus {
    Structured,
    Degraded,
    AdvisorError,
}

/// Audit record for one oracle call.
#[derive(Debug, Clone, Serialize)]
pub struct ConsultationRecord<'a, T: Serialize> {
    pub consultation_number: u32,
    pub timestamp: String,
    pub request: &'a T,
    pub raw_response: Option<&'a str>,
    pub decode_status: DecodeStatus,
    pub error: Option<&'a str>,
}

pub fn consultation_record_path(dir: &Path, consultation_number: u32) -> PathBuf {
    dir.join(format!("consultation_{consultation_number}.json"))
}

pub fn write_consultation_record<T: Serialize>(
    dir: &Path,
    record: &ConsultationRecord<'_, T>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create artifacts dir {}", dir.display()))?;
    let path = consultation_record_path(dir, record.consultation_number);
    write_json(&path, record)?;
    Ok(path)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::command::CommandStatus;
    use crate::test_support::{ScriptedRunner, command_solution};
    use serde_json::{Value, json};
    use std::time::Duration;

    #[test]
    fn log_counts_commands_and_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/resolution_log.json");
        let runner = ScriptedRunner::new().with("pip install b", CommandStatus::Failed, "ERROR: b");
        let mut session = ResolutionSession::default();
        session.iteration = 2;
        session
            .ledger
            .record_attempt(&command_solution("a", 1, &["pip install a"]), 1);
        session
            .ledger
            .execute(&runner, "pip install a", "", Duration::from_secs(1));
        session
            .ledger
            .execute(&runner, "pip install b", "", Duration::from_secs(1));

        let log = ResolutionLog::new(
            Path::new("exectest1.json"),
            "EXHAUSTED",
            "pass limit".to_string(),
            &session,
        );
        write_resolution_log(&path, &log).expect("write");

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["resolution_status"], STATUS_INCOMPLETE);
        assert_eq!(written["terminal_state"], "EXHAUSTED");
        assert_eq!(written["iterations"], 2);
        assert_eq!(written["total_commands"], 2);
        assert_eq!(written["successful_commands"], 1);
        assert_eq!(written["solution_history"].as_array().map(Vec::len), Some(1));
        assert_eq!(written["execution_log"][1]["exit_code"], 1);
    }

    #[test]
    fn consultation_record_lands_in_numbered_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = json!({"problem_context": "ctx"});
        let path = write_consultation_record(
            temp.path(),
            &ConsultationRecord {
                consultation_number: 3,
                timestamp: now_timestamp(),
                request: &request,
                raw_response: Some("{}"),
                decode_status: DecodeStatus::Structured,
                error: None,
            },
        )
        .expect("write");

        assert!(path.ends_with("consultation_3.json"));
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["decode_status"], "structured");
        assert_eq!(written["request"]["problem_context"], "ctx");
    }
}
