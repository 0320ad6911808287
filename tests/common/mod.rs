#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

pub use fibra::test_utils::{
    init_test_logging, test_runtime, test_runtime_with_carriers,
};
pub use fibra::{assert_with_log, test_complete, test_phase, test_section};

use std::time::{Duration, Instant};

/// Standard per-test setup: logging plus a phase banner.
pub fn init_test(test_name: &str) {
    init_test_logging();
    fibra::test_phase!(test_name);
}

/// Polls a condition until it holds or the deadline passes. Counter-based
/// assertions on a live runtime need this; state transitions are observable
/// but not synchronous with the observer.
pub fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
