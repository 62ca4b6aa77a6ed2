//! Test utilities for deferlab.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Virtual-clock and runner constructors
//! - A recording result sink
//!
//! # Example
//! ```
//! use deferlab::test_utils::{init_test_logging, test_clock};
//!
//! init_test_logging();
//! let clock = test_clock();
//! clock.advance(10).unwrap();
//! ```

use crate::config::HarnessConfig;
use crate::time::{Scheduler, VirtualClock};
use crate::unittest::{Runner, TestResult};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;

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

/// Create a fresh virtual clock at time zero.
#[must_use]
pub fn test_clock() -> VirtualClock {
    VirtualClock::new()
}

/// Create a runner driven by a fresh virtual clock, returning both.
#[must_use]
pub fn test_runner() -> (Runner, VirtualClock) {
    let clock = VirtualClock::new();
    let scheduler: Rc<dyn Scheduler> = Rc::new(clock.clone());
    (Runner::new(scheduler, HarnessConfig::default()), clock)
}

/// Create a shared, empty [`TestResult`] suitable for `Runner::run`.
#[must_use]
pub fn shared_result() -> Rc<RefCell<TestResult>> {
    Rc::new(RefCell::new(TestResult::new()))
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

/// Log before assertions for context.
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

/// Assert that a deferred has fired with a value equal to `$expected`.
#[macro_export]
macro_rules! assert_fired_with {
    ($deferred:expr, $expected:expr) => {
        match $deferred.peek_value() {
            Some(Ok(v)) => assert_eq!(v, $expected),
            other => panic!("expected fired value {:?}, got {:?}", $expected, other),
        }
    };
}

/// Assert that a deferred currently holds a failure of type `$ty`.
#[macro_export]
macro_rules! assert_failed_with {
    ($deferred:expr, $ty:ty) => {
        match $deferred.peek_value() {
            Some(Err(f)) => assert!(
                f.check::<$ty>().is_some(),
                "expected failure of type {}, got {}",
                stringify!($ty),
                f
            ),
            other => panic!("expected failure of type {}, got {:?}", stringify!($ty), other),
        }
    };
}
