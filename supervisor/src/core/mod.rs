//! Deterministic, pure logic shared by the supervisor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests. Time-dependent
//! functions take `now` explicitly; only thin wrappers read the wall clock.

pub mod checklist;
pub mod rate_limit;
pub mod resume;
pub mod types;
