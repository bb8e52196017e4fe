//! Test Helper Utilities
//!
//! Shared fixtures and log capture for dgn-cache integration tests

#![allow(dead_code, unused_imports)]

pub mod fixtures;
pub mod log_capture;

pub use fixtures::*;
pub use log_capture::{capture_logs, LogCapture};
