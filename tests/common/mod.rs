#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

pub use eventide::test_utils::{init_test_logging, init_test_logging_with_level};

/// Standard preamble: logging plus a phase marker.
pub fn init_test(test_name: &str) {
    init_test_logging();
    eventide::test_phase!(test_name);
}
