//! Escalation to the oracle after a pass with zero successes.
//!
//! Every call that passes the budget guard is charged before the advisor is
//! invoked, whatever the outcome. The decoded response is reduced to a
//! [`Consultation`] the loop turns into a state transition.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::apply::FailedCommand;
use crate::core::budget::remaining_consultations;
use crate::core::decode::decode;
use crate::core::outcome::extract_error_lines;
use crate::core::queue::build_queue;
use crate::core::types::{Recommendation, Solution};
use crate::io::advisor::{AdviceRequest, Advisor};
use crate::io::prompt::{DEFAULT_PROMPT_BUDGET_BYTES, PromptBuilder};
use crate::io::resolution_log::{ConsultationRecord, DecodeStatus, write_consultation_record};
use crate::ledger::{SolutionHistoryEntry, now_timestamp};
use crate::session::ResolutionSession;

/// Failed commands sent verbatim per request.
pub const MAX_FAILED_IN_REQUEST: usize = 3;
/// Error lines extracted from failed command output per request.
pub const MAX_ERROR_LINES: usize = 5;
/// Most recent solution attempts sent per request.
pub const HISTORY_WINDOW: usize = 10;
/// Tail of each failed command's output sent per request; pip reports the
/// resolution error last.
pub const MAX_FAILED_OUTPUT_BYTES: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsultConfig {
    pub max_ai_iterations: u32,
    pub advisor_timeout: Duration,
    /// Directory receiving `consultation_<n>.json` audit files.
    pub artifacts_dir: PathBuf,
    pub prompt_budget_bytes: usize,
}

impl Default for ConsultConfig {
    fn default() -> Self {
        Self {
            max_ai_iterations: 8,
            advisor_timeout: Duration::from_secs(15 * 60),
            artifacts_dir: PathBuf::from("."),
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
        }
    }
}

/// Structured request sent to the oracle on escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationPayload {
    pub consultation_number: u32,
    pub consecutive_failures: u32,
    pub problem_context: String,
    /// Failed commands in the pass, before truncation to the first few.
    pub failed_total: usize,
    pub failed_solutions: Vec<FailedCommand>,
    pub extracted_error_lines: Vec<String>,
    pub solution_history: Vec<SolutionHistoryEntry>,
}

impl EscalationPayload {
    fn build(
        session: &ResolutionSession,
        failed: &[FailedCommand],
        problem_context: &str,
    ) -> Self {
        Self {
            consultation_number: session.ai_consultation_count,
            consecutive_failures: session.consecutive_failures,
            problem_context: problem_context.to_string(),
            failed_total: failed.len(),
            failed_solutions: failed
                .iter()
                .take(MAX_FAILED_IN_REQUEST)
                .map(|cmd| FailedCommand {
                    output: output_tail(&cmd.output, MAX_FAILED_OUTPUT_BYTES),
                    ..cmd.clone()
                })
                .collect(),
            extracted_error_lines: extract_error_lines(
                failed.iter().map(|cmd| cmd.output.as_str()),
                MAX_ERROR_LINES,
            ),
            solution_history: session.ledger.recent_history(HISTORY_WINDOW).to_vec(),
        }
    }
}

/// Last `max` bytes of `output`, on a char boundary, with a note of what was cut.
fn output_tail(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_string();
    }
    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("[{start} bytes omitted]\n{}", &output[start..])
}

/// What one escalation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consultation {
    /// The budget was already spent; nothing was charged or sent.
    BudgetExhausted { used: u32, max: u32 },
    /// Transport error, undecodable response or missing `recommended_solutions`.
    Failed { reason: String },
    /// The oracle set `should_continue = false`.
    Stop {
        next_steps: Option<String>,
        surfaced: Vec<Solution>,
    },
    /// The response carried solutions but none the loop may apply.
    NoActionable { surfaced: Vec<Solution> },
    Solutions {
        queue: Vec<Solution>,
        surfaced: Vec<Solution>,
        recommendation: Box<Recommendation>,
    },
}

/// Consult the oracle about a pass in which every solution failed.
#[instrument(skip_all, fields(used = session.ai_consultation_count, max = config.max_ai_iterations))]
pub fn consult<A: Advisor + ?Sized>(
    advisor: &A,
    config: &ConsultConfig,
    session: &mut ResolutionSession,
    failed: &[FailedCommand],
    problem_context: &str,
) -> Consultation {
    if remaining_consultations(session.ai_consultation_count, config.max_ai_iterations).is_none()
    {
        info!("consultation budget exhausted");
        return Consultation::BudgetExhausted {
            used: session.ai_consultation_count,
            max: config.max_ai_iterations,
        };
    }

    session.ai_consultation_count += 1;
    session.web_search_count += 1;
    let number = session.ai_consultation_count;
    let payload = EscalationPayload::build(session, failed, problem_context);
    info!(
        consultation = number,
        failed = payload.failed_total,
        error_lines = payload.extracted_error_lines.len(),
        "consulting oracle"
    );

    let raw = match request_advice(advisor, config, &payload) {
        Ok(raw) => raw,
        Err(reason) => {
            warn!(consultation = number, reason = %reason, "consultation failed");
            record(config, &payload, None, DecodeStatus::AdvisorError, Some(&reason));
            return Consultation::Failed { reason };
        }
    };

    let decoded = decode(&raw);
    if decoded.is_degraded() {
        warn!(consultation = number, "oracle response could not be decoded");
        record(config, &payload, Some(&raw), DecodeStatus::Degraded, None);
        return Consultation::Failed {
            reason: "oracle response could not be decoded".to_string(),
        };
    }
    record(config, &payload, Some(&raw), DecodeStatus::Structured, None);

    classify(decoded.into_recommendation())
}

fn request_advice<A: Advisor + ?Sized>(
    advisor: &A,
    config: &ConsultConfig,
    payload: &EscalationPayload,
) -> Result<String, String> {
    let number = payload.consultation_number;
    let prompt = PromptBuilder::new(config.prompt_budget_bytes)
        .build_escalation(payload)
        .map_err(|err| format!("render escalation prompt: {err:#}"))?;
    let request = AdviceRequest {
        label: format!("consultation-{number}"),
        prompt,
        payload: serde_json::to_value(payload)
            .map_err(|err| format!("serialize escalation payload: {err}"))?,
        output_path: config
            .artifacts_dir
            .join(format!("consultation_{number}.response.md")),
        timeout: config.advisor_timeout,
    };
    advisor
        .advise(&request)
        .map_err(|err| format!("advisor error: {err:#}"))
}

/// Turn a decoded response into the outcome the loop acts on.
///
/// A stop request wins over anything else in the response.
fn classify(recommendation: Recommendation) -> Consultation {
    let (queue, surfaced) = build_queue(recommendation.solutions());

    if recommendation.requests_stop() {
        info!("oracle requested stop");
        return Consultation::Stop {
            next_steps: recommendation.next_steps.clone(),
            surfaced,
        };
    }
    if recommendation.recommended_solutions.is_none() {
        return Consultation::Failed {
            reason: "oracle response has no recommended_solutions".to_string(),
        };
    }
    for solution in &surfaced {
        info!(
            solution_type = solution.solution_type.as_str(),
            description = %solution.description,
            "surfaced non-command recommendation"
        );
    }
    if queue.is_empty() {
        return Consultation::NoActionable { surfaced };
    }
    info!(queue = queue.len(), "oracle returned actionable solutions");
    Consultation::Solutions {
        queue,
        surfaced,
        recommendation: Box::new(recommendation),
    }
}

fn record(
    config: &ConsultConfig,
    payload: &EscalationPayload,
    raw_response: Option<&str>,
    decode_status: DecodeStatus,
    error: Option<&str>,
) {
    let record = ConsultationRecord {
        consultation_number: payload.consultation_number,
        timestamp: now_timestamp(),
        request: payload,
        raw_response,
        decode_status,
        error,
    };
    if let Err(err) = write_consultation_record(&config.artifacts_dir, &record) {
        warn!(err = %format!("{err:#}"), "could not write consultation record");
    }
}
