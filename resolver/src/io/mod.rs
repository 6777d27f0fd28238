//! Side-effecting helpers: process execution, the oracle transport, config
//! and persisted artifacts.

pub mod advisor;
pub mod command;
pub mod config;
pub mod diagnosis;
pub mod process;
pub mod prompt;
pub mod resolution_log;
