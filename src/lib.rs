//! Deferlab: deferred results, virtual time, and an asynchronous test harness.
//!
//! # Overview
//!
//! Deferlab is a single-threaded toolkit for code whose results arrive later
//! and for testing that code deterministically. A result is a [`Deferred`]:
//! fired once, fed through handlers in order, never by recursion. Time is a
//! [`Scheduler`]: the [`VirtualClock`] moves only when told to, so timer-driven
//! code runs the same way on every run. Tests run through a [`Runner`] that
//! chains setUp, the test method and tearDown as deferreds and catches tests
//! that leave scheduled work behind.
//!
//! # Core Guarantees
//!
//! - **Fire once**: a deferred accepts exactly one result; a second is an error
//! - **Bounded stack**: handler chains and suites of any length drain iteratively
//! - **Deterministic time**: virtual calls fire in `(fire_at, insertion)` order
//! - **No silent failures**: a dropped deferred holding a failure is reported
//! - **Leak detection**: calls a test leaves scheduled fail that test
//!
//! # Module Structure
//!
//! - [`defer`]: [`Deferred`], [`Step`], [`Failure`]
//! - [`combinator`]: [`DeferredList`], [`gather_results`]
//! - [`time`]: [`Scheduler`], [`VirtualClock`], [`WallClockScheduler`]
//! - [`eventual`]: batched next-turn callbacks
//! - [`unittest`]: fixtures, suites, runner, result sinks
//! - [`config`]: [`HarnessConfig`] and layered loading
//! - [`error`](mod@error): error types
//! - [`types`]: [`Ticket`] and [`Time`]
//! - [`tracing_compat`]: optional tracing integration (`tracing-integration` feature)
//!
//! # Example
//!
//! ```
//! use deferlab::{Deferred, Step, VirtualClock};
//!
//! let clock = VirtualClock::new();
//! let d = Deferred::new();
//! let fire = d.clone();
//! clock.set_timeout(move || { let _ = fire.callback(20); }, 100);
//! d.add_callback(|v| Step::Value(v + 1));
//!
//! clock.advance(100).unwrap();
//! assert_eq!(d.peek_value().unwrap().unwrap(), 21);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod combinator;
pub mod config;
pub mod defer;
pub mod error;
pub mod eventual;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod unittest;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use combinator::{DeferredList, FirstError, ListEntry, ListOutcome, gather_results};
pub use config::{ConfigLoader, HarnessConfig};
pub use defer::{Deferred, Failure, PanicError, Step, take_unhandled_failures};
pub use error::{ClockAdvanceError, ConfigError, DeferError, HarnessError};
pub use eventual::EventualQueue;
pub use time::{Scheduler, VirtualClock, VirtualDate, WallClockScheduler};
pub use types::{Ticket, Time};
pub use unittest::{
    AssertionError, Fixture, ResultSink, Runner, SkipTest, Test, TestCase, TestContext,
    TestResult, TestSuite,
};
