//! Solution queue ordering.

use crate::core::types::Solution;

/// Split solutions into the actionable queue and the ones surfaced to the
/// operator only.
///
/// The queue holds `commands` solutions in ascending priority; ties keep the
/// order the oracle returned them in.
pub fn build_queue(solutions: &[Solution]) -> (Vec<Solution>, Vec<Solution>) {
    let (mut actionable, surfaced): (Vec<Solution>, Vec<Solution>) = solutions
        .iter()
        .cloned()
        .partition(Solution::is_actionable);
    actionable.sort_by_key(|solution| solution.priority);
    (actionable, surfaced)
}
