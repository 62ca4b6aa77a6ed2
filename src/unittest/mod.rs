//! Asynchronous unit-test harness.
//!
//! Tests are [`TestCase`]s, usually loaded from a [`Fixture`] with
//! [`TestSuite::from_fixture`], and grouped into [`TestSuite`]s. A
//! [`Runner`] drives each case through setUp, its method and tearDown on an
//! injected [`Scheduler`](crate::time::Scheduler), reporting to any
//! [`ResultSink`].
//!
//! Every case gets a [`TestContext`]: timers set through it are tracked, and
//! a test that leaves calls scheduled after tearDown is reported as an error.
//!
//! ```
//! use deferlab::config::HarnessConfig;
//! use deferlab::time::VirtualClock;
//! use deferlab::unittest::{FnCase, Test, TestSuite, done, run_console};
//! use std::rc::Rc;
//!
//! let mut suite = TestSuite::new("Demo");
//! suite.add_test(Test::case(FnCase::new("Demo.test_ok", |cx| {
//!     cx.assert_true(true, "holds")?;
//!     done()
//! })));
//!
//! let clock = VirtualClock::new();
//! let summary = run_console(
//!     &Test::from(suite),
//!     Rc::new(clock),
//!     HarnessConfig::default(),
//!     std::io::sink(),
//! )
//! .unwrap();
//! assert!(summary.was_successful());
//! ```

pub mod case;
pub mod context;
pub mod pending;
pub mod report;
pub mod result;
pub mod runner;
pub mod suite;
pub mod visitor;

pub use case::{
    Fixture, FixtureCase, FnCase, TestCase, TestMethod, TestStep, done, is_runnable_fixture_name,
    wait_for,
};
pub use context::{AssertionError, SkipTest, TestContext};
pub use pending::{PendingCalls, PendingCallsError, TrackingScheduler};
pub use report::{ConsoleReporter, JsonReporter, ReportEvent};
pub use result::{ResultSink, Summary, TestResult, format_summary, machine_summary};
pub use runner::{Runner, SinkRef, run_console};
pub use suite::{CaseRef, Test, TestSuite};
pub use visitor::{CaseVisitor, SerialVisitor, SynchronousVisitor};
