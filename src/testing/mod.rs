//! Deterministic synthetic signal sources for tests and diagnostics.

pub mod signals;
