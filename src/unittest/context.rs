//! What a running test gets handed: timers and assertions.

use super::pending::{PendingCalls, TrackingScheduler};
use crate::defer::{Deferred, Failure, Step, guarded};
use crate::time::Scheduler;
use crate::types::{Ticket, Time};
use core::fmt;
use std::any::type_name;
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

/// A test assertion did not hold. Reported as a failure, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AssertionError {
    message: String,
}

impl AssertionError {
    /// Creates an assertion error with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message, including its `[n]` prefix when raised by a context.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The test chose not to run. Reported as a skip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SkipTest {
    reason: String,
}

impl SkipTest {
    /// Creates a skip with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the test was skipped.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

struct ContextInner {
    id: String,
    scheduler: Rc<TrackingScheduler>,
    assertions: Cell<usize>,
}

/// Per-test handle to the run's scheduler and the assertion helpers.
///
/// Cloning is cheap, so deferred handlers can keep one. Every timer set
/// through a context is tracked; calls left behind after tearDown turn a
/// passing test into an error.
///
/// Failed assertions come back as `Err(Failure)` carrying an
/// [`AssertionError`] whose message starts with `[n]`, `n` being the number
/// of assertions that passed before it.
#[derive(Clone)]
pub struct TestContext {
    inner: Rc<ContextInner>,
}

impl TestContext {
    /// Creates a context for test `id` scheduling through `scheduler`.
    #[must_use]
    pub fn new(id: impl Into<String>, scheduler: TrackingScheduler) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                id: id.into(),
                scheduler: Rc::new(scheduler),
                assertions: Cell::new(0),
            }),
        }
    }

    /// Id of the test this context belongs to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The tracking scheduler, for code that takes a `Rc<dyn Scheduler>`.
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.scheduler.clone()
    }

    /// Calls scheduled through this context that have not run or been cleared.
    #[must_use]
    pub fn pending_calls(&self) -> &Rc<PendingCalls> {
        self.inner.scheduler.pending_calls()
    }

    /// Runs `f` once, `delay_ms` from now.
    pub fn set_timeout(&self, f: impl FnMut() + 'static, delay_ms: u64) -> Ticket {
        self.inner.scheduler.set_timeout(Box::new(f), delay_ms)
    }

    /// Runs `f` every `interval_ms` until cleared.
    pub fn set_interval(&self, f: impl FnMut() + 'static, interval_ms: u64) -> Ticket {
        self.inner.scheduler.set_interval(Box::new(f), interval_ms)
    }

    /// Cancels a pending call.
    pub fn clear_timeout(&self, ticket: Ticket) {
        self.inner.scheduler.clear_timeout(ticket);
    }

    /// Cancels a pending call.
    pub fn clear_interval(&self, ticket: Ticket) {
        self.inner.scheduler.clear_interval(ticket);
    }

    /// The scheduler's current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.scheduler.now()
    }

    /// Number of assertions that have passed so far.
    #[must_use]
    pub fn assertion_count(&self) -> usize {
        self.inner.assertions.get()
    }

    /// An assertion failure with `reason`, numbered by the current count.
    #[must_use]
    pub fn fail(&self, reason: impl fmt::Display) -> Failure {
        Failure::new(AssertionError::new(format!(
            "[{}] {reason}",
            self.inner.assertions.get()
        )))
    }

    /// A skip with `reason`.
    #[must_use]
    pub fn skip(&self, reason: impl Into<String>) -> Failure {
        Failure::new(SkipTest::new(reason))
    }

    fn passed(&self) -> Result<(), Failure> {
        self.inner.assertions.set(self.inner.assertions.get() + 1);
        Ok(())
    }

    fn check(&self, ok: bool, reason: impl FnOnce() -> String) -> Result<(), Failure> {
        if ok { Ok(()) } else { Err(self.fail(reason())) }
    }

    /// Fails with `message` unless `value` is true.
    pub fn assert_true(&self, value: bool, message: &str) -> Result<(), Failure> {
        self.check(value, || message.to_owned())?;
        self.passed()
    }

    /// Fails with `message` unless `value` is false.
    pub fn assert_false(&self, value: bool, message: &str) -> Result<(), Failure> {
        self.check(!value, || message.to_owned())?;
        self.passed()
    }

    fn compare<A, B>(
        &self,
        ok: bool,
        description: &str,
        a: &A,
        b: &B,
        message: &str,
    ) -> Result<(), Failure>
    where
        A: fmt::Debug + ?Sized,
        B: fmt::Debug + ?Sized,
    {
        self.check(ok, || {
            let mut msg = format!("{a:?} {description} {b:?}");
            if !message.is_empty() {
                msg.push_str(": ");
                msg.push_str(message);
            }
            msg
        })?;
        self.passed()
    }

    /// Fails unless `a == b`.
    pub fn assert_equal<T>(&self, a: &T, b: &T, message: &str) -> Result<(), Failure>
    where
        T: PartialEq + fmt::Debug + ?Sized,
    {
        self.compare(a == b, "!=", a, b, message)
    }

    /// Fails if `a == b`.
    pub fn assert_not_equal<T>(&self, a: &T, b: &T, message: &str) -> Result<(), Failure>
    where
        T: PartialEq + fmt::Debug + ?Sized,
    {
        self.compare(a != b, "==", a, b, message)
    }

    /// Fails unless both handles point at the same allocation.
    pub fn assert_identical<T>(&self, a: &Rc<T>, b: &Rc<T>, message: &str) -> Result<(), Failure>
    where
        T: fmt::Debug + ?Sized,
    {
        self.compare(Rc::ptr_eq(a, b), "is not", a, b, message)
    }

    /// Fails unless `haystack` contains `needle`.
    pub fn assert_in<T>(&self, needle: &T, haystack: &[T], message: &str) -> Result<(), Failure>
    where
        T: PartialEq + fmt::Debug,
    {
        self.compare(haystack.contains(needle), "not in", needle, haystack, message)
    }

    /// Runs `f` and expects it to fail with an `E`, either by returning
    /// `Err` or by panicking (a panic is a [`PanicError`](crate::defer::PanicError)).
    ///
    /// Returns the failure so its details can be checked further.
    pub fn assert_throws<E, R, X>(&self, f: impl FnOnce() -> Result<R, X>) -> Result<Failure, Failure>
    where
        E: std::error::Error + 'static,
        R: 'static,
        X: Into<Failure>,
    {
        let thrown = match guarded(|| Step::from(f())) {
            Step::Fail(failure) => Some(failure),
            Step::Value(_) | Step::Wait(_) => None,
        };
        let Some(failure) = thrown else {
            return Err(self.fail("Callable threw no error"));
        };
        self.check(failure.is::<E>(), || {
            format!("Wrong error type thrown: {failure}, expected {}", type_name::<E>())
        })?;
        self.passed()?;
        Ok(failure)
    }

    /// Expects `deferred` to errback with an `E`.
    ///
    /// The returned deferred fires with that failure, or fails with an
    /// [`AssertionError`] if `deferred` succeeded or failed differently.
    /// Consumes `deferred`'s result.
    pub fn assert_failure<E, T>(&self, deferred: &Deferred<T>) -> Deferred<Failure>
    where
        E: std::error::Error + 'static,
        T: 'static,
    {
        let cx = self.clone();
        let checked = deferred.chain(move |outcome| match outcome {
            Ok(_) => Step::Fail(cx.fail("Deferred reached callback; expected an errback.")),
            Err(failure) if failure.is::<E>() => Step::Value(failure),
            Err(failure) => Step::Fail(cx.fail(format!(
                "Expected {}, got {failure}",
                type_name::<E>()
            ))),
        });
        self.inner.assertions.set(self.inner.assertions.get() + 1);
        checked
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("id", &self.inner.id)
            .field("assertions", &self.inner.assertions.get())
            .field("pending", self.pending_calls())
            .finish()
    }
}
