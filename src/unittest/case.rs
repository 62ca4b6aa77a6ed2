//! Test cases and the fixtures they come from.
//!
//! A [`Fixture`] is a type with a table of named test methods; each method
//! becomes its own [`TestCase`] on a fresh fixture instance. Test methods and
//! the setUp/tearDown hooks return a [`TestStep`], so assertions chain with
//! `?` and asynchronous tests hand back a deferred:
//!
//! ```
//! use deferlab::unittest::{Fixture, TestContext, TestMethod, TestStep, done};
//!
//! #[derive(Default)]
//! struct Arithmetic;
//!
//! impl Arithmetic {
//!     fn test_add(&mut self, cx: &TestContext) -> TestStep {
//!         cx.assert_equal(&(1 + 1), &2, "sum")?;
//!         done()
//!     }
//! }
//!
//! impl Fixture for Arithmetic {
//!     const NAME: &'static str = "Arithmetic";
//!     fn tests() -> Vec<(&'static str, TestMethod<Self>)> {
//!         vec![("test_add", Self::test_add as TestMethod<Self>)]
//!     }
//! }
//! ```

use super::context::TestContext;
use crate::defer::{Deferred, Failure, Step};
use core::fmt;

/// What a test method or hook returns.
///
/// `Err` and `Ok(Step::Fail)` both fail the step; `Ok(Step::Wait(d))` makes
/// the runner wait for `d`.
pub type TestStep = Result<Step<()>, Failure>;

/// A step that finished successfully.
#[must_use]
pub fn done() -> TestStep {
    Ok(Step::Value(()))
}

/// A step that finishes when `deferred` fires.
#[must_use]
pub fn wait_for(deferred: Deferred<()>) -> TestStep {
    Ok(Step::Wait(deferred))
}

pub(crate) fn settle(step: TestStep) -> Step<()> {
    step.unwrap_or_else(Step::Fail)
}

/// A test method on fixture `F`.
pub type TestMethod<F> = fn(&mut F, &TestContext) -> TestStep;

/// A group of test methods sharing setUp and tearDown.
pub trait Fixture: Default + 'static {
    /// Name used in test ids (`NAME.method`).
    const NAME: &'static str;

    /// Every method with its name. Only names starting with `test_` are loaded.
    fn tests() -> Vec<(&'static str, TestMethod<Self>)>;

    /// Runs before each test method.
    fn set_up(&mut self, _cx: &TestContext) -> TestStep {
        done()
    }

    /// Runs after each test method, even a failed one.
    fn tear_down(&mut self, _cx: &TestContext) -> TestStep {
        done()
    }
}

/// A single runnable test.
pub trait TestCase {
    /// Identifies the test in reports.
    fn id(&self) -> String;
    /// Prepares the test.
    fn set_up(&mut self, cx: &TestContext) -> TestStep;
    /// The test body.
    fn run_method(&mut self, cx: &TestContext) -> TestStep;
    /// Cleans up after the test.
    fn tear_down(&mut self, cx: &TestContext) -> TestStep;
}

/// One method of a fixture, on its own fixture instance.
pub struct FixtureCase<F: Fixture> {
    fixture: F,
    name: &'static str,
    method: TestMethod<F>,
}

impl<F: Fixture> FixtureCase<F> {
    /// Creates the case for `method`, named `name`, on a default fixture.
    #[must_use]
    pub fn new(name: &'static str, method: TestMethod<F>) -> Self {
        Self {
            fixture: F::default(),
            name,
            method,
        }
    }
}

impl<F: Fixture> TestCase for FixtureCase<F> {
    fn id(&self) -> String {
        format!("{}.{}", F::NAME, self.name)
    }

    fn set_up(&mut self, cx: &TestContext) -> TestStep {
        self.fixture.set_up(cx)
    }

    fn run_method(&mut self, cx: &TestContext) -> TestStep {
        (self.method)(&mut self.fixture, cx)
    }

    fn tear_down(&mut self, cx: &TestContext) -> TestStep {
        self.fixture.tear_down(cx)
    }
}

impl<F: Fixture> fmt::Debug for FixtureCase<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureCase").field("id", &self.id()).finish()
    }
}

/// A test built from a closure, with no setUp or tearDown.
pub struct FnCase {
    id: String,
    body: Box<dyn FnMut(&TestContext) -> TestStep>,
}

impl FnCase {
    /// Creates a case named `id` running `body`.
    pub fn new(id: impl Into<String>, body: impl FnMut(&TestContext) -> TestStep + 'static) -> Self {
        Self {
            id: id.into(),
            body: Box::new(body),
        }
    }
}

impl TestCase for FnCase {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn set_up(&mut self, _cx: &TestContext) -> TestStep {
        done()
    }

    fn run_method(&mut self, cx: &TestContext) -> TestStep {
        (self.body)(cx)
    }

    fn tear_down(&mut self, _cx: &TestContext) -> TestStep {
        done()
    }
}

impl fmt::Debug for FnCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCase").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Fixtures whose name starts with `_` are helpers, not tests.
#[must_use]
pub fn is_runnable_fixture_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::VirtualClock;
    use crate::unittest::pending::TrackingScheduler;
    use std::rc::Rc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Default)]
    struct Counter {
        set_up_calls: usize,
    }

    impl Counter {
        fn test_one(&mut self, cx: &TestContext) -> TestStep {
            cx.assert_equal(&self.set_up_calls, &1, "setUp ran first")?;
            done()
        }
    }

    impl Fixture for Counter {
        const NAME: &'static str = "Counter";

        fn tests() -> Vec<(&'static str, TestMethod<Self>)> {
            vec![("test_one", Self::test_one as TestMethod<Self>)]
        }

        fn set_up(&mut self, _cx: &TestContext) -> TestStep {
            self.set_up_calls += 1;
            done()
        }
    }

    #[test]
    fn fixture_case_id_and_hooks() {
        init_test("fixture_case_id_and_hooks");
        let mut case = FixtureCase::<Counter>::new("test_one", Counter::test_one);
        let id = case.id();
        crate::assert_with_log!(id == "Counter.test_one", "qualified id", "Counter.test_one", id);
        let tracking = TrackingScheduler::new(Rc::new(VirtualClock::new()), Rc::default());
        let cx = TestContext::new(case.id(), tracking);
        let set_up = matches!(case.set_up(&cx), Ok(Step::Value(())));
        crate::assert_with_log!(set_up, "setUp done", true, set_up);
        let method = matches!(case.run_method(&cx), Ok(Step::Value(())));
        crate::assert_with_log!(method, "method saw setUp", true, method);
        crate::test_complete!("fixture_case_id_and_hooks");
    }

    #[test]
    fn settle_flattens_errors() {
        init_test("settle_flattens_errors");
        let failed = matches!(settle(Err(Failure::msg("x"))), Step::Fail(_));
        crate::assert_with_log!(failed, "error becomes Fail", true, failed);
        let value = matches!(settle(done()), Step::Value(()));
        crate::assert_with_log!(value, "done becomes Value", true, value);
        let waits = matches!(settle(wait_for(Deferred::new())), Step::Wait(_));
        crate::assert_with_log!(waits, "wait_for becomes Wait", true, waits);
        crate::test_complete!("settle_flattens_errors");
    }

    #[test]
    fn underscore_fixtures_are_not_runnable() {
        init_test("underscore_fixtures_are_not_runnable");
        let verdicts = ["Arithmetic", "_Base", ""].map(is_runnable_fixture_name);
        crate::assert_with_log!(
            verdicts == [true, false, false],
            "only plain names run",
            [true, false, false],
            verdicts
        );
        crate::test_complete!("underscore_fixtures_are_not_runnable");
    }
}
