//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod compose;
pub mod immutability;
pub mod invariants;
pub mod merge_state;
pub mod selector;
pub mod types;
