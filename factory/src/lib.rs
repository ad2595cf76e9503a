//! Deterministic code-change orchestration.
//!
//! A task (goal, constraints, file scope, mode) runs through a fixed pipeline
//! of capabilities and ends in a single auditable [`core::types::RunResult`].
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (shapes, scope, safety gate, diffs).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution,
//!   run artifacts).
//! - **[`registry`]**: Capability descriptors on disk and the invoker that
//!   wraps every call in a uniform envelope.
//! - **[`capabilities`]**: Built-in capability implementations.
//!
//! [`orchestrator`] coordinates all of them for one run.

pub mod capabilities;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
