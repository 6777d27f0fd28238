//! The resolution loop.
//!
//! Drives a [`ResolutionSession`] from the initial diagnosis to one of three
//! terminal states and persists the session on the way out:
//!
//! ```text
//! LOADING -> EVALUATING_QUEUE -> APPLYING <-> VERIFYING -> SOLVED
//!                  ^                   |
//!                  |               ESCALATING -> EXHAUSTED | STOPPED
//!                  +-------------------+
//! ```

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::apply::{ApplyConfig, ApplyOutcome, ApplyReport, apply_solution};
use crate::consult::{ConsultConfig, Consultation, consult};
use crate::core::budget::pass_allowed;
use crate::core::queue::build_queue;
use crate::core::types::{OverallStatus, Recommendation, Solution};
use crate::io::advisor::Advisor;
use crate::io::command::CommandRunner;
use crate::io::diagnosis::DEFAULT_DIAGNOSIS_FILE;
use crate::io::resolution_log::{DEFAULT_LOG_FILE, ResolutionLog, write_resolution_log};
use crate::session::ResolutionSession;

/// Default cap on resolution passes.
pub const DEFAULT_MAX_TOTAL_ITERATIONS: u32 = 20;

/// Settings for one resolution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveConfig {
    pub apply: ApplyConfig,
    pub consult: ConsultConfig,
    pub max_total_iterations: u32,
    /// Dependency check run after a solution succeeds; `None` disables it.
    pub final_check: Option<String>,
    /// Recorded in the resolution log.
    pub diagnosis_file: PathBuf,
    pub log_path: PathBuf,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            apply: ApplyConfig::default(),
            consult: ConsultConfig::default(),
            max_total_iterations: DEFAULT_MAX_TOTAL_ITERATIONS,
            final_check: Some("pip check".to_string()),
            diagnosis_file: PathBuf::from(DEFAULT_DIAGNOSIS_FILE),
            log_path: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

/// Why the loop ended without a solve because it ran out of options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustedReason {
    /// The active queue had no actionable solutions.
    EmptyQueue,
    /// A pass failed and escalation is disabled.
    NoAdvisor,
    PassLimit { passes: u32 },
    ConsultationBudget { used: u32, max: u32 },
}

/// Why the loop ended after an escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    OracleRequested { next_steps: Option<String> },
    ConsultationFailed { reason: String },
    NoActionableSolutions,
}

/// Terminal state of a resolution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStatus {
    Solved,
    Exhausted(ExhaustedReason),
    Stopped(StopReason),
}

impl ResolutionStatus {
    pub fn is_solved(&self) -> bool {
        matches!(self, ResolutionStatus::Solved)
    }

    pub fn terminal_state(&self) -> &'static str {
        match self {
            ResolutionStatus::Solved => "SOLVED",
            ResolutionStatus::Exhausted(_) => "EXHAUSTED",
            ResolutionStatus::Stopped(_) => "STOPPED",
        }
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStatus::Solved => write!(f, "solved"),
            ResolutionStatus::Exhausted(reason) => match reason {
                ExhaustedReason::EmptyQueue => write!(f, "no solutions left to try"),
                ExhaustedReason::NoAdvisor => {
                    write!(f, "all solutions failed and no advisory assistance is available")
                }
                ExhaustedReason::PassLimit { passes } => {
                    write!(f, "reached the limit of {passes} passes")
                }
                ExhaustedReason::ConsultationBudget { used, max } => {
                    write!(f, "consultation budget spent ({used}/{max})")
                }
            },
            ResolutionStatus::Stopped(reason) => match reason {
                StopReason::OracleRequested { next_steps: Some(steps) } => {
                    write!(f, "oracle recommends stopping: {steps}")
                }
                StopReason::OracleRequested { next_steps: None } => {
                    write!(f, "oracle recommends stopping")
                }
                StopReason::ConsultationFailed { reason } => {
                    write!(f, "consultation failed: {reason}")
                }
                StopReason::NoActionableSolutions => {
                    write!(f, "oracle returned no command-based solutions")
                }
            },
        }
    }
}

/// Progress notifications for operator output.
#[derive(Debug)]
pub enum ResolutionEvent<'a> {
    PassStarted {
        pass: u32,
        max_passes: u32,
        queue_len: usize,
        session: &'a ResolutionSession,
    },
    SolutionApplied {
        ordinal: u32,
        solution: &'a Solution,
        report: &'a ApplyReport,
    },
    FinalCheck { passed: bool },
    /// A recommendation the loop never applies on its own.
    Surfaced { solution: &'a Solution },
    PassFailed { consecutive_failures: u32 },
    Escalated {
        consultation: u32,
        recommendation: &'a Recommendation,
        queue_len: usize,
    },
}

/// Summary of a resolution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub status: ResolutionStatus,
    pub session: ResolutionSession,
}

/// Run the loop on `diagnosis` and persist the session to `config.log_path`.
///
/// Command failures, oracle failures and budget limits all end in a
/// [`ResolutionStatus`]; the only error returned is a failure to write the
/// resolution log.
#[instrument(skip_all, fields(diagnosis = %config.diagnosis_file.display()))]
pub fn run_resolution<R, F>(
    diagnosis: &Recommendation,
    runner: &R,
    advisor: Option<&dyn Advisor>,
    config: &ResolveConfig,
    mut on_event: F,
) -> Result<ResolutionOutcome>
where
    R: CommandRunner + ?Sized,
    F: FnMut(&ResolutionEvent<'_>),
{
    let mut session = ResolutionSession::default();
    let status = drive(diagnosis, runner, advisor, config, &mut session, &mut on_event);
    info!(
        state = status.terminal_state(),
        passes = session.iteration,
        consultations = session.ai_consultation_count,
        "resolution finished"
    );

    let log = ResolutionLog::new(
        &config.diagnosis_file,
        status.terminal_state(),
        status.to_string(),
        &session,
    );
    write_resolution_log(&config.log_path, &log)
        .with_context(|| format!("persist resolution log {}", config.log_path.display()))?;

    Ok(ResolutionOutcome { status, session })
}

fn drive<R, F>(
    diagnosis: &Recommendation,
    runner: &R,
    advisor: Option<&dyn Advisor>,
    config: &ResolveConfig,
    session: &mut ResolutionSession,
    on_event: &mut F,
) -> ResolutionStatus
where
    R: CommandRunner + ?Sized,
    F: FnMut(&ResolutionEvent<'_>),
{
    if diagnosis.overall_status == OverallStatus::Success {
        info!("diagnosis reports success, nothing to resolve");
        session.solved = true;
        return ResolutionStatus::Solved;
    }

    let (queue, surfaced) = build_queue(diagnosis.solutions());
    for solution in &surfaced {
        on_event(&ResolutionEvent::Surfaced { solution });
    }
    session.queue = queue;
    let problem_context = problem_context(diagnosis);
    let mut ordinal = 0u32;

    loop {
        if session.queue.is_empty() {
            return ResolutionStatus::Exhausted(ExhaustedReason::EmptyQueue);
        }
        if !pass_allowed(session.iteration, config.max_total_iterations) {
            return ResolutionStatus::Exhausted(ExhaustedReason::PassLimit {
                passes: session.iteration,
            });
        }

        session.iteration += 1;
        on_event(&ResolutionEvent::PassStarted {
            pass: session.iteration,
            max_passes: config.max_total_iterations,
            queue_len: session.queue.len(),
            session: &*session,
        });

        let queue = session.queue.clone();
        let mut successes = 0u32;
        let mut failed_commands = Vec::new();
        for solution in &queue {
            ordinal += 1;
            let report = apply_solution(runner, &config.apply, session, solution, ordinal);
            on_event(&ResolutionEvent::SolutionApplied {
                ordinal,
                solution,
                report: &report,
            });
            match report.outcome {
                ApplyOutcome::Succeeded => {
                    successes += 1;
                    if confirm_solved(runner, config, session, on_event) {
                        return ResolutionStatus::Solved;
                    }
                }
                ApplyOutcome::Failed => failed_commands.extend(report.failed_commands),
                ApplyOutcome::NotApplicable => {}
            }
        }

        if successes > 0 {
            // Something applied cleanly but nothing confirmed it; retry the queue.
            info!(pass = session.iteration, successes, "pass ended without a confirmed solve");
            continue;
        }

        session.consecutive_failures += 1;
        on_event(&ResolutionEvent::PassFailed {
            consecutive_failures: session.consecutive_failures,
        });

        let Some(advisor) = advisor else {
            return ResolutionStatus::Exhausted(ExhaustedReason::NoAdvisor);
        };
        if !pass_allowed(session.iteration, config.max_total_iterations) {
            return ResolutionStatus::Exhausted(ExhaustedReason::PassLimit {
                passes: session.iteration,
            });
        }

        match consult(advisor, &config.consult, session, &failed_commands, &problem_context) {
            Consultation::BudgetExhausted { used, max } => {
                return ResolutionStatus::Exhausted(ExhaustedReason::ConsultationBudget {
                    used,
                    max,
                });
            }
            Consultation::Failed { reason } => {
                return ResolutionStatus::Stopped(StopReason::ConsultationFailed { reason });
            }
            Consultation::Stop {
                next_steps,
                surfaced,
            } => {
                for solution in &surfaced {
                    on_event(&ResolutionEvent::Surfaced { solution });
                }
                return ResolutionStatus::Stopped(StopReason::OracleRequested { next_steps });
            }
            Consultation::NoActionable { surfaced } => {
                for solution in &surfaced {
                    on_event(&ResolutionEvent::Surfaced { solution });
                }
                return ResolutionStatus::Stopped(StopReason::NoActionableSolutions);
            }
            Consultation::Solutions {
                queue,
                surfaced,
                recommendation,
            } => {
                for solution in &surfaced {
                    on_event(&ResolutionEvent::Surfaced { solution });
                }
                on_event(&ResolutionEvent::Escalated {
                    consultation: session.ai_consultation_count,
                    recommendation: &recommendation,
                    queue_len: queue.len(),
                });
                session.replace_queue(queue);
            }
        }
    }
}

/// Decide whether a successful solution ends the run.
///
/// A configured final check overrides the verification result in both
/// directions; without one, only a passing verification counts.
fn confirm_solved<R, F>(
    runner: &R,
    config: &ResolveConfig,
    session: &mut ResolutionSession,
    on_event: &mut F,
) -> bool
where
    R: CommandRunner + ?Sized,
    F: FnMut(&ResolutionEvent<'_>),
{
    let Some(check) = config.final_check.as_deref() else {
        return session.solved;
    };
    let result = session.ledger.execute(
        runner,
        check,
        "Final dependency check",
        config.apply.command_timeout,
    );
    session.solved = result.success();
    if !session.solved {
        warn!(command = %check, "final dependency check failed");
    }
    on_event(&ResolutionEvent::FinalCheck {
        passed: session.solved,
    });
    session.solved
}

/// Problem statement sent with every escalation.
fn problem_context(diagnosis: &Recommendation) -> String {
    let mut context = if diagnosis.summary.trim().is_empty() {
        "Package conflict".to_string()
    } else {
        diagnosis.summary.trim().to_string()
    };
    for issue in &diagnosis.issues_found {
        context.push_str(&format!(
            "\n- [{}] {}",
            issue.severity.as_str(),
            issue.description
        ));
        if !issue.affected_packages.is_empty() {
            let packages: Vec<&str> = issue.affected_packages.iter().map(String::as_str).collect();
            context.push_str(&format!(" (packages: {})", packages.join(", ")));
        }
    }
    context
}
