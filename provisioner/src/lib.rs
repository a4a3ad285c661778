//! Idempotent host provisioning engine.
//!
//! This crate turns the usual "install script" into a plan of uniform steps:
//! each step probes whether its end-state already holds (skip), otherwise
//! runs its action with retry/backoff and optionally polls a postcondition
//! until ready. A fatal failure aborts the run; re-running is always safe
//! because satisfied steps skip themselves. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (outcomes, reports, backoff).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (processes, probes, config, lock,
//!   credentials, service units, run artifacts).
//!
//! Orchestration modules ([`plan`], [`sequencer`], [`verify`], [`report`],
//! [`plans`]) coordinate core logic with I/O to implement the CLI commands.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod plans;
pub mod report;
pub mod sequencer;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
