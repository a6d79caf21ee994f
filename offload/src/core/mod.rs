//! Deterministic, pure logic for integrity checking, screening, scoring, and
//! script synthesis.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests. The
//! only ambient input is the injected [`rate_limit::Clock`].

pub mod candidates;
pub mod determinism;
pub mod hashing;
pub mod integrity;
pub mod promotion;
pub mod rate_limit;
pub mod script;
pub mod squash;
pub mod types;
