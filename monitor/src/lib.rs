//! Poll-driven supervisor for long-running agent tasks.
//!
//! Each poll reads a checklist of task ids, assesses every task from on-disk
//! evidence, and decides whether to start, resume, recover, finalize or leave
//! it alone. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decision engine, drift evaluation,
//!   checklist parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (filesystem layout, markers, locks,
//!   process liveness and signalling, launching). Traits at the seams so tests
//!   can substitute fakes.
//!
//! Orchestration modules ([`pass`], [`daemon`], [`stop`], [`status`]) combine
//! the two to implement CLI commands.

pub mod core;
pub mod daemon;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pass;
pub mod status;
pub mod stop;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
