//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diff;
pub mod paths;
pub mod review;
pub mod safety;
pub mod shape;
pub mod types;
