//! Test utilities for Fibra.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Small runtime constructors
//! - Completion-with-deadline assertion helper
//!
//! # Example
//! ```
//! use fibra::test_utils::{init_test_logging, test_runtime};
//!
//! fn my_test() {
//!     init_test_logging();
//!     let rt = test_runtime();
//!     let handle = rt.spawn(async { 2 + 2 });
//!     assert_eq!(handle.get_blocking(), Ok(4));
//! }
//! ```

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::fmt::format::FmtSpan;

use crate::runtime::FiberRuntime;
use crate::strand;
use crate::time;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// A two-carrier runtime for tests; small enough to surface scheduling
/// races, large enough that one wedged fiber cannot stall everything.
#[must_use]
pub fn test_runtime() -> FiberRuntime {
    FiberRuntime::builder()
        .carriers(2)
        .thread_name("fibra-test")
        .build()
}

/// A runtime with a specific carrier count.
#[must_use]
pub fn test_runtime_with_carriers(carriers: usize) -> FiberRuntime {
    FiberRuntime::builder()
        .carriers(carriers)
        .thread_name("fibra-test")
        .build()
}

/// Block on a future, failing the test if the deadline passes first.
pub fn assert_completes_within<F, T>(deadline: Duration, description: &str, future: F) -> T
where
    F: std::future::Future<Output = T> + Send + Unpin,
{
    match strand::block_on(time::timeout(deadline, future)) {
        Ok(value) => {
            tracing::debug!(%description, "operation completed within deadline");
            value
        }
        Err(time::Elapsed) => panic!("operation timed out: {description}"),
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Assert with logged expected/actual values.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
