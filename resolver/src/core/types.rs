//! Shared deterministic types for resolver core logic.
//!
//! These types define the contracts between the diagnosis file, the advisory
//! oracle and the resolution loop. Every advisory field is optional or
//! defaulted: the oracle is untrusted, and a missing field must never make an
//! otherwise usable recommendation undecodable.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// Priority assigned to solutions that do not declare one.
pub const DEFAULT_PRIORITY: i64 = 999;

/// Overall verdict of a diagnosis or consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    NeedsAttention,
    CriticalError,
    #[serde(other)]
    Unknown,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Success => "success",
            OverallStatus::NeedsAttention => "needs_attention",
            OverallStatus::CriticalError => "critical_error",
            OverallStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    VersionConflict,
    MissingDependency,
    BuildError,
    PermissionError,
    DeprecationWarning,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Unknown => "unknown",
        }
    }
}

/// Kind of remediation. Only [`SolutionType::Commands`] is applied automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionType {
    Commands,
    UserAction,
    WebSearch,
    EnvironmentSetup,
    #[serde(other)]
    Other,
}

impl SolutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SolutionType::Commands => "commands",
            SolutionType::UserAction => "user_action",
            SolutionType::WebSearch => "web_search",
            SolutionType::EnvironmentSetup => "environment_setup",
            SolutionType::Other => "other",
        }
    }
}

/// A problem found by the oracle in one of the executed install commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default, deserialize_with = "string_or_number")]
    pub command_index: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: IssueType,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub affected_packages: BTreeSet<String>,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub web_verified: bool,
}

/// A proposed remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default = "default_solution_type")]
    pub solution_type: SolutionType,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub undo_commands: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_command: Option<String>,
    #[serde(default)]
    pub web_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub different_because: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

impl Solution {
    pub fn is_actionable(&self) -> bool {
        self.solution_type == SolutionType::Commands
    }

    /// Verification command, ignoring blank strings the oracle sometimes emits.
    pub fn verification(&self) -> Option<&str> {
        self.verification_command
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearch {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub findings: String,
    #[serde(default)]
    pub source_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativePackage {
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub alternative: String,
    #[serde(default)]
    pub reason: String,
}

/// Structured result produced by the oracle: the initial diagnosis file and
/// every escalation response share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default = "default_overall_status")]
    pub overall_status: OverallStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub issues_found: Vec<Issue>,
    /// `None` when the key is absent, which callers treat differently from an
    /// explicit empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_solutions: Option<Vec<Solution>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_continue: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_searches_performed: Vec<WebSearch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_packages: Vec<AlternativePackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prevention_tips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl Recommendation {
    /// Sentinel returned when an advisory response could not be decoded.
    pub fn critical_error(raw: &str) -> Self {
        Self {
            overall_status: OverallStatus::CriticalError,
            summary: "Failed to parse advisory response as JSON".to_string(),
            issues_found: Vec::new(),
            recommended_solutions: Some(Vec::new()),
            should_continue: None,
            web_searches_performed: Vec::new(),
            alternative_packages: Vec::new(),
            root_cause_analysis: None,
            new_strategy: None,
            confidence_level: None,
            next_steps: None,
            prevention_tips: vec!["Ensure the advisory service returns valid JSON".to_string()],
            raw_response: Some(raw.to_string()),
        }
    }

    pub fn solutions(&self) -> &[Solution] {
        self.recommended_solutions.as_deref().unwrap_or_default()
    }

    /// True only when the oracle explicitly asked to stop.
    pub fn requests_stop(&self) -> bool {
        self.should_continue == Some(false)
    }
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

fn default_solution_type() -> SolutionType {
    SolutionType::Other
}

fn default_issue_type() -> IssueType {
    IssueType::Other
}

fn default_severity() -> Severity {
    Severity::Unknown
}

fn default_overall_status() -> OverallStatus {
    OverallStatus::Unknown
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Index {
        Text(String),
        Number(i64),
    }

    Ok(match Index::deserialize(deserializer)? {
        Index::Text(text) => text,
        Index::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solution_defaults_fill_missing_fields() {
        let solution: Solution = serde_json::from_str(r#"{"commands": ["pip install a"]}"#)
            .expect("parse solution");
        assert_eq!(solution.priority, DEFAULT_PRIORITY);
        assert_eq!(solution.solution_type, SolutionType::Other);
        assert!(!solution.is_actionable());
        assert!(solution.undo_commands.is_empty());
    }

    #[test]
    fn unknown_enum_values_decode_as_fallbacks() {
        let issue: Issue = serde_json::from_str(
            r#"{"command_index": 2, "issue_type": "python_version_conflict", "severity": "blocker"}"#,
        )
        .expect("parse issue");
        assert_eq!(issue.command_index, "2");
        assert_eq!(issue.issue_type, IssueType::Other);
        assert_eq!(issue.severity, Severity::Unknown);
    }

    #[test]
    fn absent_solutions_differ_from_empty_solutions() {
        let absent: Recommendation =
            serde_json::from_str(r#"{"overall_status": "needs_attention"}"#).expect("parse");
        let empty: Recommendation = serde_json::from_str(
            r#"{"overall_status": "needs_attention", "recommended_solutions": []}"#,
        )
        .expect("parse");
        assert_eq!(absent.recommended_solutions, None);
        assert_eq!(empty.recommended_solutions, Some(Vec::new()));
        assert!(absent.solutions().is_empty());
    }

    #[test]
    fn blank_verification_is_ignored() {
        let solution: Solution = serde_json::from_str(
            r#"{"solution_type": "commands", "verification_command": "  "}"#,
        )
        .expect("parse");
        assert_eq!(solution.verification(), None);
    }

    #[test]
    fn stop_requires_explicit_false() {
        let mut rec = Recommendation::critical_error("raw");
        assert!(!rec.requests_stop());
        rec.should_continue = Some(true);
        assert!(!rec.requests_stop());
        rec.should_continue = Some(false);
        assert!(rec.requests_stop());
    }
}
