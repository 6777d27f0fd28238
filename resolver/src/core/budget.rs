//! Budget helpers for the resolution loop.
//!
//! Both limits are hard ceilings: consultations are charged on the attempt,
//! and passes are counted before they run.

/// Consultations still available, or `None` once `used` reached `max`.
pub fn remaining_consultations(used: u32, max: u32) -> Option<u32> {
    max.checked_sub(used).filter(|remaining| *remaining > 0)
}

/// True when another pass may start after `passes_run` passes.
pub fn pass_allowed(passes_run: u32, max_passes: u32) -> bool {
    passes_run < max_passes
}
