//! Initial diagnosis: run the install commands, ask the oracle to classify
//! what went wrong, and write the diagnosis file the resolution loop reads.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::decode::decode;
use crate::core::types::Recommendation;
use crate::io::advisor::{AdviceRequest, Advisor};
use crate::io::command::{CommandResult, CommandRunner, DEFAULT_COMMAND_TIMEOUT};
use crate::io::diagnosis::{DEFAULT_DIAGNOSIS_FILE, write_diagnosis};
use crate::io::prompt::{DEFAULT_PROMPT_BUDGET_BYTES, DiagnosisPromptInput, PromptBuilder};
use crate::io::resolution_log::{ConsultationRecord, DecodeStatus, write_consultation_record};
use crate::ledger::{Ledger, now_timestamp};

/// Commands describing the interpreter and installed packages.
pub const ENVIRONMENT_DIAGNOSTICS: [&str; 4] =
    ["python --version", "pip --version", "pip list", "pip check"];

pub const DEFAULT_INSTALLER: &str = "pip install";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnoseConfig {
    pub packages: Vec<String>,
    /// Prefix of each install command; the package name is appended.
    pub installer: String,
    pub environment_diagnostics: bool,
    pub command_timeout: Duration,
    pub advisor_timeout: Duration,
    pub output_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub prompt_budget_bytes: usize,
}

impl Default for DiagnoseConfig {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            installer: DEFAULT_INSTALLER.to_string(),
            environment_diagnostics: true,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            advisor_timeout: Duration::from_secs(15 * 60),
            output_path: PathBuf::from(DEFAULT_DIAGNOSIS_FILE),
            artifacts_dir: PathBuf::from("."),
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
        }
    }
}

/// One executed command as presented to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    pub index: usize,
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
}

impl CommandReport {
    fn new(index: usize, command: &str, result: &CommandResult) -> Self {
        Self {
            index,
            command: command.to_string(),
            success: result.success(),
            exit_code: result.exit_code,
            timed_out: result.timed_out(),
            output: result.output.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnoseOutcome {
    pub diagnosis: Recommendation,
    /// The oracle response could not be decoded; `diagnosis` is the sentinel.
    pub degraded: bool,
    pub commands: Vec<CommandReport>,
    pub ledger: Ledger,
}

#[derive(Debug, Serialize)]
struct DiagnosisPayload<'a> {
    diagnostics: &'a [CommandReport],
    commands: &'a [CommandReport],
}

/// Produce and write the initial diagnosis.
///
/// Command failures are the input, not errors. An advisor transport failure
/// or a write failure is returned as an error and nothing is written.
#[instrument(skip_all, fields(packages = config.packages.len()))]
pub fn run_diagnosis<R, A>(runner: &R, advisor: &A, config: &DiagnoseConfig) -> Result<DiagnoseOutcome>
where
    R: CommandRunner + ?Sized,
    A: Advisor + ?Sized,
{
    let mut ledger = Ledger::new();

    let mut diagnostics = Vec::new();
    if config.environment_diagnostics {
        for (idx, command) in ENVIRONMENT_DIAGNOSTICS.iter().enumerate() {
            let result =
                ledger.execute(runner, command, "Environment diagnostic", config.command_timeout);
            diagnostics.push(CommandReport::new(idx + 1, command, &result));
        }
    }

    let mut commands = Vec::with_capacity(config.packages.len());
    for (idx, package) in config.packages.iter().enumerate() {
        let command = format!("{} {}", config.installer.trim(), package.trim());
        let result = ledger.execute(runner, &command, "Install package", config.command_timeout);
        if !result.success() {
            warn!(command = %command, status = ?result.status, "install command failed");
        }
        commands.push(CommandReport::new(idx + 1, &command, &result));
    }
    info!(
        failed = commands.iter().filter(|c| !c.success).count(),
        "install commands finished"
    );

    let payload = DiagnosisPayload {
        diagnostics: &diagnostics,
        commands: &commands,
    };
    let prompt = PromptBuilder::new(config.prompt_budget_bytes).build_diagnosis(
        &DiagnosisPromptInput {
            diagnostics: &diagnostics,
            commands: &commands,
        },
    )?;
    let request = AdviceRequest {
        label: "diagnosis".to_string(),
        prompt,
        payload: serde_json::to_value(&payload).context("serialize diagnosis payload")?,
        output_path: config.artifacts_dir.join("diagnosis.response.md"),
        timeout: config.advisor_timeout,
    };
    let raw = advisor.advise(&request).context("request initial diagnosis")?;

    let decoded = decode(&raw);
    let degraded = decoded.is_degraded();
    if degraded {
        warn!("diagnosis response could not be decoded, writing critical_error sentinel");
    }
    let record = ConsultationRecord {
        consultation_number: 0,
        timestamp: now_timestamp(),
        request: &payload,
        raw_response: Some(&raw),
        decode_status: if degraded {
            DecodeStatus::Degraded
        } else {
            DecodeStatus::Structured
        },
        error: None,
    };
    if let Err(err) = write_consultation_record(&config.artifacts_dir, &record) {
        warn!(err = %format!("{err:#}"), "could not write diagnosis record");
    }

    let diagnosis = decoded.into_recommendation();
    write_diagnosis(&config.output_path, &diagnosis)?;
    info!(
        path = %config.output_path.display(),
        status = diagnosis.overall_status.as_str(),
        "diagnosis written"
    );

    Ok(DiagnoseOutcome {
        diagnosis,
        degraded,
        commands,
        ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::OverallStatus;
    use crate::io::command::CommandStatus;
    use crate::io::diagnosis::load_diagnosis;
    use crate::test_support::{ScriptedAdvisor, ScriptedRunner};

    fn config(dir: &std::path::Path, packages: &[&str]) -> DiagnoseConfig {
        DiagnoseConfig {
            packages: packages.iter().map(|p| p.to_string()).collect(),
            output_path: dir.join("exectest1.json"),
            artifacts_dir: dir.join("artifacts"),
            ..DiagnoseConfig::default()
        }
    }

    #[test]
    fn runs_diagnostics_then_installs_and_writes_diagnosis() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new().with(
            "pip install pandas==1.0",
            CommandStatus::Failed,
            "ERROR: Cannot install pandas==1.0 because these package versions have conflicting dependencies.",
        );
        let advisor = ScriptedAdvisor::new(vec![Ok(r#"```json
            {"overall_status": "needs_attention", "summary": "pandas pin conflicts",
             "recommended_solutions": [{"solution_type": "commands", "priority": 1,
                                        "commands": ["pip install pandas==2.2"]}]}
            ```"#
            .to_string())]);
        let cfg = config(temp.path(), &["numpy", "pandas==1.0"]);

        let outcome = run_diagnosis(&runner, &advisor, &cfg).expect("diagnose");

        assert!(!outcome.degraded);
        assert_eq!(
            runner.calls(),
            vec![
                "python --version",
                "pip --version",
                "pip list",
                "pip check",
                "pip install numpy",
                "pip install pandas==1.0",
            ]
        );
        assert!(!outcome.commands[1].success);
        let written = load_diagnosis(&cfg.output_path).expect("load");
        assert_eq!(written.overall_status, OverallStatus::NeedsAttention);
        assert_eq!(written.solutions().len(), 1);

        let requests = advisor.requests();
        assert!(requests[0].prompt.contains("### Environment Diagnostics"));
        assert!(requests[0].prompt.contains("pip install pandas==1.0"));
        assert!(temp.path().join("artifacts/consultation_0.json").exists());
    }

    #[test]
    fn skips_environment_diagnostics_when_disabled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new();
        let advisor =
            ScriptedAdvisor::new(vec![Ok(r#"{"overall_status": "success"}"#.to_string())]);
        let cfg = DiagnoseConfig {
            environment_diagnostics: false,
            installer: "uv pip install".to_string(),
            ..config(temp.path(), &["requests"])
        };

        let outcome = run_diagnosis(&runner, &advisor, &cfg).expect("diagnose");

        assert_eq!(runner.calls(), vec!["uv pip install requests"]);
        assert_eq!(outcome.diagnosis.overall_status, OverallStatus::Success);
        assert!(!advisor.requests()[0].prompt.contains("### Environment Diagnostics"));
    }

    #[test]
    fn undecodable_response_writes_sentinel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new();
        let advisor = ScriptedAdvisor::new(vec![Ok("Sorry, I cannot help.".to_string())]);
        let cfg = config(temp.path(), &["numpy"]);

        let outcome = run_diagnosis(&runner, &advisor, &cfg).expect("diagnose");

        assert!(outcome.degraded);
        let written = load_diagnosis(&cfg.output_path).expect("load");
        assert_eq!(written.overall_status, OverallStatus::CriticalError);
        assert_eq!(written.raw_response.as_deref(), Some("Sorry, I cannot help."));
    }

    #[test]
    fn advisor_failure_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::new();
        let advisor = ScriptedAdvisor::new(vec![Err("codex not found".to_string())]);
        let cfg = config(temp.path(), &["numpy"]);

        let err = run_diagnosis(&runner, &advisor, &cfg).unwrap_err();

        assert!(format!("{err:#}").contains("codex not found"));
        assert!(!cfg.output_path.exists());
    }
}
