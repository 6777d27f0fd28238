//! Prompt builder for oracle consultations.
//!
//! Templates mark each section as `required` or `droppable`; when a rendered
//! prompt exceeds its byte budget, droppable sections are removed in a fixed
//! order before anything required is truncated.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::consult::EscalationPayload;

const ESCALATION_TEMPLATE: &str = include_str!("prompts/escalation.md");
const DIAGNOSIS_TEMPLATE: &str = include_str!("prompts/diagnosis.md");

/// Default prompt budget in bytes.
pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 40_000;

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("escalation", ESCALATION_TEMPLATE)
            .expect("escalation template should be valid");
        env.add_template("diagnosis", DIAGNOSIS_TEMPLATE)
            .expect("diagnosis template should be valid");
        Self { env }
    }

    fn render_escalation(&self, payload: &EscalationPayload) -> Result<String> {
        let template = self.env.get_template("escalation")?;
        let rendered = template.render(context! {
            consultation_number => payload.consultation_number,
            consecutive_failures => payload.consecutive_failures,
            problem_context => payload.problem_context.trim(),
            error_lines => &payload.extracted_error_lines,
            failed_total => payload.failed_total,
            failed_shown => payload.failed_solutions.len(),
            failed_solutions => non_empty_json(&payload.failed_solutions)?,
            history => non_empty_json(&payload.solution_history)?,
        })?;
        Ok(rendered)
    }

    fn render_diagnosis(&self, input: &DiagnosisPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template("diagnosis")?;
        let rendered = template.render(context! {
            diagnostics => non_empty_json(input.diagnostics)?,
            commands => pretty_json(input.commands)?,
        })?;
        Ok(rendered)
    }
}

fn pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialize prompt payload")
}

fn non_empty_json<T: Serialize>(items: &[T]) -> Result<Option<String>> {
    if items.is_empty() {
        return Ok(None);
    }
    pretty_json(items).map(Some)
}

/// Inputs for the initial diagnosis prompt.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisPromptInput<'a, T: Serialize = serde_json::Value> {
    /// Environment diagnostic command reports (may be empty).
    pub diagnostics: &'a [T],
    /// Install command reports to analyze.
    pub commands: &'a [T],
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "history").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    /// Full section content including header.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    use std::sync::LazyLock;
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker pattern is valid")
    });

    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(rendered.len());

        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in drop_order {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: truncate the largest section, on a char boundary.
    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let excess = total - budget;
    let before_len = largest.content.len();
    let mut keep = before_len.saturating_sub(excess + 12);
    while keep > 0 && !largest.content.is_char_boundary(keep) {
        keep -= 1;
    }
    largest.content.truncate(keep);
    largest.content.push_str("\n[truncated]");
    debug!(
        section = largest.key,
        before_len,
        after_len = largest.content.len(),
        "truncated section for budget"
    );
}

/// Render sections back to a single string.
fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_BUDGET_BYTES)
    }
}

impl PromptBuilder {
    /// Create a builder with the given byte budget.
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Build the escalation prompt sent after a pass with zero successes.
    ///
    /// The solution history is required so the oracle can refuse repeats.
    /// Drop order: failures -> errors.
    pub fn build_escalation(&self, payload: &EscalationPayload) -> Result<String> {
        let rendered = PromptEngine::new().render_escalation(payload)?;
        Ok(self.fit(&rendered, &["failures", "errors"]))
    }

    /// Build the initial diagnosis prompt.
    ///
    /// Drop order: environment.
    pub fn build_diagnosis<T: Serialize>(&self, input: &DiagnosisPromptInput<'_, T>) -> Result<String> {
        let diagnostics = to_values(input.diagnostics)?;
        let commands = to_values(input.commands)?;
        let rendered = PromptEngine::new().render_diagnosis(&DiagnosisPromptInput {
            diagnostics: &diagnostics,
            commands: &commands,
        })?;
        Ok(self.fit(&rendered, &["environment"]))
    }

    fn fit(&self, rendered: &str, drop_order: &[&str]) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes, drop_order);
        render_sections(&sections)
    }
}

fn to_values<T: Serialize>(items: &[T]) -> Result<Vec<serde_json::Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).context("serialize prompt payload"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::FailedCommand;
    use crate::ledger::SolutionHistoryEntry;
    use serde_json::json;

    fn payload() -> EscalationPayload {
        EscalationPayload {
            consultation_number: 2,
            consecutive_failures: 1,
            problem_context: "numpy conflicts with pandas".to_string(),
            failed_total: 1,
            failed_solutions: vec![FailedCommand {
                command: "pip install pandas==2.2".to_string(),
                output: "ERROR: ResolutionImpossible".to_string(),
                exit_code: Some(1),
            }],
            extracted_error_lines: vec!["ERROR: ResolutionImpossible".to_string()],
            solution_history: vec![SolutionHistoryEntry {
                ordinal: 1,
                description: "pin pandas".to_string(),
                commands: vec!["pip install pandas==2.2".to_string()],
                timestamp: "2026-01-01T00:00:00Z".to_string(),
            }],
        }
    }

    /// Verifies escalation sections appear in deterministic order.
    #[test]
    fn escalation_ordering_is_stable() {
        let content = PromptBuilder::default()
            .build_escalation(&payload())
            .expect("render");

        let contract = content.find("### Escalation Contract").expect("contract");
        let problem = content.find("### Problem").expect("problem");
        let errors = content.find("### Extracted Errors").expect("errors");
        let failures = content.find("### Failed Commands").expect("failures");
        let history = content.find("### Solution History").expect("history");
        let format = content.find("### Response Format").expect("format");

        assert!(contract < problem);
        assert!(problem < errors);
        assert!(errors < failures);
        assert!(failures < history);
        assert!(history < format);
        assert!(content.contains("consultation #2"));
        assert!(content.contains("pin pandas"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let mut payload = payload();
        payload.solution_history.clear();
        payload.extracted_error_lines.clear();
        let content = PromptBuilder::default()
            .build_escalation(&payload)
            .expect("render");
        assert!(!content.contains("### Solution History"));
        assert!(!content.contains("### Extracted Errors"));
        assert!(content.contains("### Failed Commands"));
    }

    /// Oversized failure output is dropped before the history, which
    /// always survives.
    #[test]
    fn budget_keeps_history_when_failures_are_large() {
        let mut payload = payload();
        payload.failed_solutions[0].output = "Collecting numpy\n".repeat(5_000);

        let content = PromptBuilder::default()
            .build_escalation(&payload)
            .expect("render");
        assert!(content.len() <= DEFAULT_PROMPT_BUDGET_BYTES);
        assert!(content.contains("### Solution History"));
        assert!(content.contains("pin pandas"));
        assert!(!content.contains("### Failed Commands"));
        assert!(content.contains("### Escalation Contract"));
        assert!(content.contains("### Response Format"));
    }

    #[test]
    fn diagnosis_prompt_embeds_command_reports() {
        let commands = vec![json!({"index": 1, "command": "pip install numpy", "output": "ok"})];
        let content = PromptBuilder::default()
            .build_diagnosis(&DiagnosisPromptInput {
                diagnostics: &[],
                commands: &commands,
            })
            .expect("render");
        assert!(content.contains("### Diagnosis Contract"));
        assert!(content.contains("pip install numpy"));
        assert!(!content.contains("### Environment Diagnostics"));
    }
}
