//! Deterministic tool-call offloading.
//!
//! Given an append-only log of tool invocations captured across many agent
//! sessions, this crate identifies operations whose output is reproducible,
//! synthesizes replacement scripts for them, and proves each script against
//! the recorded output before it is trusted. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (hashing, integrity checks, rate
//!   limiting, squashing, promotion, determinism analysis, script synthesis).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, the JSONL execution log,
//!   subprocess dry runs).
//!
//! Orchestration modules ([`capture`], [`plan`]) coordinate core logic with
//! I/O for the capture path and the offline planning pass.

pub mod capture;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
