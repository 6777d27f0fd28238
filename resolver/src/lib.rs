//! Automated resolution of package-installation conflicts.
//!
//! The crate runs install commands, asks an external oracle to diagnose the
//! failures, applies the proposed fixes and escalates back to the oracle when
//! every fix in a pass fails. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decoding, success judgement,
//!   queue ordering, budgets). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (shell commands, the oracle
//!   process, config and artifact files). Isolated behind traits so tests can
//!   script them.
//!
//! Orchestration modules ([`apply`], [`consult`], [`resolve`], [`diagnose`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod apply;
pub mod consult;
pub mod core;
pub mod diagnose;
pub mod exit_codes;
pub mod io;
pub mod ledger;
pub mod logging;
pub mod resolve;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
