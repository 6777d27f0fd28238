//! Stable exit codes for resolver CLI commands.

/// `resolve` reached SOLVED, or `diagnose` wrote a diagnosis.
pub const OK: i32 = 0;
/// `resolve` ended EXHAUSTED or STOPPED.
pub const UNSOLVED: i32 = 1;
/// Invalid config or diagnosis file, or any other error.
pub const INVALID: i32 = 1;
