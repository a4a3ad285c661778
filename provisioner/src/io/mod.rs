//! Side-effecting operations: process execution, host probes, config and
//! lock files, credentials, service units, run artifacts.

pub mod config;
pub mod credentials;
pub mod lockfile;
pub mod probes;
pub mod process;
pub mod runlog;
pub mod service;
