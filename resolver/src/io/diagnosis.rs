//! Diagnosis file storage.
//!
//! The diagnosis file is the loop's only required input. It is validated
//! against `schemas/diagnosis.schema.json` before deserialization so a
//! malformed file is rejected with every violation listed, and never reaches
//! the loop.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::types::Recommendation;

/// Default diagnosis file name, looked up in the working directory.
pub const DEFAULT_DIAGNOSIS_FILE: &str = "exectest1.json";

const DIAGNOSIS_SCHEMA: &str = include_str!("../../schemas/diagnosis.schema.json");

/// Load, unwrap and validate a diagnosis file.
pub fn load_diagnosis(path: &Path) -> Result<Recommendation> {
    debug!(path = %path.display(), "loading diagnosis");
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_diagnosis(&raw).with_context(|| format!("load diagnosis {}", path.display()))
}

/// Parse diagnosis JSON, accepting the `{"data": {"llm": {...}}}` envelope
/// some oracle front-ends write.
pub fn parse_diagnosis(raw: &str) -> Result<Recommendation> {
    let value: Value = serde_json::from_str(raw).context("parse diagnosis json")?;
    let value = unwrap_envelope(value);
    let schema: Value = serde_json::from_str(DIAGNOSIS_SCHEMA).context("parse diagnosis schema")?;
    validate_schema(&value, &schema)?;
    serde_json::from_value(value).context("parse diagnosis as recommendation")
}

/// Write a diagnosis as pretty-printed JSON with trailing newline.
pub fn write_diagnosis(path: &Path, diagnosis: &Recommendation) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(diagnosis).context("serialize diagnosis")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

/// Human-readable summary printed before a resolution run starts.
pub fn render_summary(diagnosis: &Recommendation) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "status: {}", diagnosis.overall_status.as_str());
    if !diagnosis.summary.trim().is_empty() {
        let _ = writeln!(buf, "summary: {}", diagnosis.summary.trim());
    }
    if !diagnosis.web_searches_performed.is_empty() {
        let _ = writeln!(
            buf,
            "web searches: {}",
            diagnosis.web_searches_performed.len()
        );
    }
    if !diagnosis.issues_found.is_empty() {
        let _ = writeln!(buf, "issues: {}", diagnosis.issues_found.len());
        for (idx, issue) in diagnosis.issues_found.iter().enumerate() {
            let verified = if issue.web_verified { " (web verified)" } else { "" };
            let _ = writeln!(
                buf,
                "  [{}] {} severity={}{}",
                idx + 1,
                issue.description,
                issue.severity.as_str(),
                verified
            );
        }
    }
    buf
}

fn unwrap_envelope(value: Value) -> Value {
    match value.pointer("/data/llm") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => value,
    }
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OverallStatus, Severity};
    use crate::test_support::{command_solution, recommendation};

    #[test]
    fn loads_plain_diagnosis() {
        let rec = parse_diagnosis(
            r#"{
                "overall_status": "needs_attention",
                "summary": "conflict",
                "issues_found": [{"command_index": "1", "issue_type": "version_conflict",
                                  "severity": "high", "description": "numpy vs pandas",
                                  "affected_packages": ["numpy", "pandas"], "root_cause": "pin"}],
                "recommended_solutions": [{"solution_type": "commands", "priority": 1,
                                           "commands": ["pip install numpy==1.26.4"]}]
            }"#,
        )
        .expect("parse");
        assert_eq!(rec.overall_status, OverallStatus::NeedsAttention);
        assert_eq!(rec.issues_found[0].severity, Severity::High);
        assert_eq!(rec.solutions().len(), 1);
    }

    #[test]
    fn unwraps_data_llm_envelope() {
        let rec = parse_diagnosis(r#"{"data": {"llm": {"overall_status": "success"}}}"#)
            .expect("parse");
        assert_eq!(rec.overall_status, OverallStatus::Success);
    }

    #[test]
    fn schema_violations_are_reported() {
        let err = parse_diagnosis(
            r#"{"overall_status": "needs_attention",
                "recommended_solutions": [{"commands": "pip install a", "priority": "high"}]}"#,
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("schema validation failed"), "{msg}");
    }

    #[test]
    fn missing_status_is_rejected() {
        let err = parse_diagnosis(r#"{"error": "advisor unavailable"}"#).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_diagnosis(&temp.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("read"));
    }

    #[test]
    fn written_diagnosis_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("diag/exectest1.json");
        let rec = recommendation(
            OverallStatus::NeedsAttention,
            vec![command_solution("pin", 1, &["pip install a==1"])],
        );
        write_diagnosis(&path, &rec).expect("write");
        assert_eq!(load_diagnosis(&path).expect("load"), rec);
    }

    #[test]
    fn summary_lists_issues() {
        let rec = parse_diagnosis(
            r#"{"overall_status": "needs_attention", "summary": "two problems",
                "issues_found": [{"description": "a", "severity": "low"},
                                 {"description": "b", "severity": "critical", "web_verified": true}]}"#,
        )
        .expect("parse");
        let summary = render_summary(&rec);
        assert!(summary.contains("status: needs_attention"));
        assert!(summary.contains("issues: 2"));
        assert!(summary.contains("[2] b severity=critical (web verified)"));
    }
}
