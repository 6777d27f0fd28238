//! Deterministic, pure logic shared by the resolver.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod decode;
pub mod outcome;
pub mod queue;
pub mod types;
