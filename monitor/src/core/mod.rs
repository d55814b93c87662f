//! Deterministic, pure logic shared by the monitor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod activity;
pub mod decision;
pub mod todo;
pub mod types;
