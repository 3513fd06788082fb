#![forbid(unsafe_code)]

//! Session and test orchestration for multi-role device-pool test runs.
//!
//! Reserves devices, installs and launches every role of a test session,
//! supervises the running processes through cooperative ticks and turns
//! their output into a structured pass/fail/timeout verdict.

pub mod config;
pub mod device;
pub mod errors;
pub mod log_summary;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod report;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
