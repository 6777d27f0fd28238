//! Resilient decoding of advisory responses.
//!
//! The oracle is asked for JSON but routinely wraps it in prose or code
//! fences. Decoding is a total function: it either yields the structured
//! payload or the `critical_error` sentinel, and never fails.

use tracing::debug;

use crate::core::types::Recommendation;

/// Outcome of decoding one advisory response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The response (or its brace-delimited core) parsed as a recommendation.
    Structured(Recommendation),
    /// Nothing usable was found. Carries the sentinel with the raw text.
    Degraded(Recommendation),
}

impl Decoded {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Decoded::Degraded(_))
    }

    pub fn into_recommendation(self) -> Recommendation {
        match self {
            Decoded::Structured(rec) | Decoded::Degraded(rec) => rec,
        }
    }
}

/// Decode `raw`: strict parse, then the first-`{` to last-`}` substring, then
/// the sentinel.
pub fn decode(raw: &str) -> Decoded {
    if let Ok(rec) = serde_json::from_str::<Recommendation>(raw) {
        return Decoded::Structured(rec);
    }
    if let Some(candidate) = brace_span(raw) {
        match serde_json::from_str::<Recommendation>(candidate) {
            Ok(rec) => {
                debug!("decoded advisory payload from embedded json");
                return Decoded::Structured(rec);
            }
            Err(err) => debug!(err = %err, "embedded json did not decode"),
        }
    }
    Decoded::Degraded(Recommendation::critical_error(raw))
}

fn brace_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}
