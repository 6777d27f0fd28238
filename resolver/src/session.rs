//! Mutable state of one resolution run.

use crate::core::types::Solution;
use crate::ledger::Ledger;

/// State owned by the resolution loop for the duration of one run.
///
/// The applier and consultation manager receive `&mut` access to append to
/// the ledger and bump counters; only the loop replaces the queue or decides
/// state transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionSession {
    /// Actionable solutions for the next pass, in application order.
    pub queue: Vec<Solution>,
    /// Passes started so far.
    pub iteration: u32,
    /// Passes in a row with zero successes since the last fresh queue.
    pub consecutive_failures: u32,
    pub ai_consultation_count: u32,
    pub web_search_count: u32,
    /// Set by a passing verification; cleared again if the final check fails.
    pub solved: bool,
    pub ledger: Ledger,
}

impl ResolutionSession {
    /// Install the queue returned by a successful escalation.
    pub fn replace_queue(&mut self, queue: Vec<Solution>) {
        self.queue = queue;
        self.consecutive_failures = 0;
    }
}
