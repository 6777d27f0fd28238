//! Deterministic classification of command output.
//!
//! Package managers frequently exit with status 0 while printing resolver
//! warnings, so success is a two-part predicate: a zero exit code AND no
//! failure marker in the combined output. The marker scan is a plain
//! substring heuristic and will report some harmless output as a failure.

use std::sync::LazyLock;

use regex::Regex;

/// Case-insensitive markers that veto an otherwise successful exit code.
pub const FAILURE_MARKERS: [&str; 4] = ["error:", "failed", "could not", "conflict"];

/// Case-insensitive keywords that mark a line worth showing to the oracle.
pub const ERROR_LINE_KEYWORDS: [&str; 4] = ["error", "conflict", "requires", "incompatible"];

static FAILURE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| case_insensitive_any(&FAILURE_MARKERS));
static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| case_insensitive_any(&ERROR_LINE_KEYWORDS));

fn case_insensitive_any(words: &[&str]) -> Regex {
    let alternatives: Vec<String> = words.iter().map(|word| regex::escape(word)).collect();
    Regex::new(&format!("(?i){}", alternatives.join("|"))).expect("marker pattern is valid")
}

/// True when `output` contains any failure marker.
pub fn has_failure_marker(output: &str) -> bool {
    FAILURE_MARKER_RE.is_match(output)
}

/// Judge a finished command: exit code zero and no failure marker.
///
/// `exit_code` is `None` when the process was killed or never produced a
/// status; that is always a failure.
pub fn judge_output(exit_code: Option<i32>, output: &str) -> bool {
    exit_code == Some(0) && !has_failure_marker(output)
}

/// Collect trimmed lines containing an error keyword, in order, up to `limit`.
pub fn extract_error_lines<'a, I>(outputs: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    outputs
        .into_iter()
        .flat_map(str::lines)
        .filter(|line| ERROR_LINE_RE.is_match(line))
        .map(|line| line.trim().to_string())
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_with_clean_output_succeeds() {
        assert!(judge_output(Some(0), "Successfully installed numpy-1.26.4\n"));
    }

    #[test]
    fn zero_exit_with_textual_error_fails() {
        let output = "ERROR: pip's dependency resolver does not currently take into account all the packages\n";
        assert!(!judge_output(Some(0), output));
    }

    #[test]
    fn nonzero_exit_fails_even_with_clean_output() {
        assert!(!judge_output(Some(1), "Requirement already satisfied: six\n"));
    }

    #[test]
    fn markers_are_case_insensitive() {
        assert!(has_failure_marker("Could Not find a version"));
        assert!(has_failure_marker("Build FAILED"));
        assert!(has_failure_marker("dependency CONFLICT detected"));
        assert!(!has_failure_marker("Requirement already satisfied: six"));
    }

    #[test]
    fn bare_error_word_without_colon_is_not_a_marker() {
        assert!(!has_failure_marker("0 errors reported"));
    }

    #[test]
    fn missing_exit_code_fails() {
        assert!(!judge_output(None, ""));
    }

    #[test]
    fn extracts_first_error_lines_across_outputs() {
        let first = "Collecting pandas\n  ERROR: Cannot install pandas\nDone";
        let second = "pandas 2.2 requires numpy>=1.26\nfoo is incompatible with bar\nanother conflict\nmore errors\nlast error";
        let lines = extract_error_lines([first, second], 5);
        assert_eq!(
            lines,
            vec![
                "ERROR: Cannot install pandas",
                "pandas 2.2 requires numpy>=1.26",
                "foo is incompatible with bar",
                "another conflict",
                "more errors",
            ]
        );
    }
}
