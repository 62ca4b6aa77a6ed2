//! Single-assignment result cell with a chain of handlers.
//!
//! A [`Deferred`] starts pending, is fired exactly once with a value or a
//! [`Failure`], and feeds that result through its handlers in registration
//! order. Each handler sees the result left by the previous one.
//!
//! # Draining
//!
//! Handlers are run by an explicit loop, never by recursion:
//!
//! ```text
//! Pending --fire--> Draining --(handler returns Wait(child))--> WaitingOnChild
//!                      ^                                             |
//!                      +------------- child fires (resume) ----------+
//!                      |
//!                      +--(queue empty)--> Done
//! ```
//!
//! A child that has already fired resumes its parent while the parent is
//! still inside its loop. The `draining` flag turns that resume into a plain
//! state update, so a long run of already-resolved children costs no stack.

use super::failure::Failure;
use super::unhandled;
use crate::error::DeferError;
use crate::tracing_compat::{debug, trace};
use core::fmt;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// What a handler hands to the next link in the chain.
pub enum Step<T: 'static> {
    /// Continue with a value.
    Value(T),
    /// Continue with a failure; the next errback will see it.
    Fail(Failure),
    /// Pause the chain until this deferred fires, then continue with its result.
    Wait(Deferred<T>),
}

impl<T: 'static> Step<T> {
    /// Continue with `error` as the running failure.
    #[must_use]
    pub fn fail(error: impl Into<Failure>) -> Self {
        Self::Fail(error.into())
    }
}

impl<T: 'static, E: Into<Failure>> From<Result<T, E>> for Step<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Fail(error.into()),
        }
    }
}

impl<T: 'static> From<Deferred<T>> for Step<T> {
    fn from(deferred: Deferred<T>) -> Self {
        Self::Wait(deferred)
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            Self::Wait(d) => f.debug_tuple("Wait").field(d).finish(),
        }
    }
}

type Handler<T> = Box<dyn FnOnce(Result<T, Failure>) -> Step<T>>;
type Sink<T> = Box<dyn FnOnce(Result<T, Failure>)>;

enum Link<T: 'static> {
    /// A user handler; its `Step` becomes the running result.
    Handler(Handler<T>),
    /// Takes the running result away (to resume a parent, or to feed a
    /// deferred of another type). Later links see nothing.
    Sink(Sink<T>),
}

struct Inner<T: 'static> {
    fired: bool,
    /// Running result. `None` before firing, and after a sink consumed it.
    result: Option<Result<T, Failure>>,
    handlers: VecDeque<Link<T>>,
    draining: bool,
    pause_count: usize,
}

impl<T: 'static> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(Err(failure)) = self.result.take() {
            unhandled::report(failure);
        }
    }
}

/// A single-assignment asynchronous result with chained handlers.
///
/// Cloning a `Deferred` clones the handle; all clones observe the same state.
/// Handles are `!Send`: everything runs on one thread, interleaved by a
/// [`Scheduler`](crate::time::Scheduler).
pub struct Deferred<T: 'static> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Deferred")
                .field("fired", &inner.fired)
                .field(
                    "result",
                    &match &inner.result {
                        None => "none",
                        Some(Ok(_)) => "value",
                        Some(Err(_)) => "failure",
                    },
                )
                .field("handlers", &inner.handlers.len())
                .field("paused", &(inner.pause_count > 0))
                .finish(),
            Err(_) => f.write_str("Deferred { <busy> }"),
        }
    }
}

impl<T: 'static> Deferred<T> {
    /// Creates a pending deferred.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                fired: false,
                result: None,
                handlers: VecDeque::new(),
                draining: false,
                pause_count: 0,
            })),
        }
    }

    /// Creates a deferred that has already fired with `value`.
    #[must_use]
    pub fn succeed(value: T) -> Self {
        let d = Self::new();
        d.fire(Ok(value));
        d
    }

    /// Creates a deferred that has already fired with `error`.
    #[must_use]
    pub fn fail(error: impl Into<Failure>) -> Self {
        let d = Self::new();
        d.fire(Err(error.into()));
        d
    }

    /// Runs `f` now and wraps its outcome in a deferred.
    ///
    /// A panic or `Step::Fail` yields a failed deferred, `Step::Wait(d)`
    /// returns `d` itself, and `Step::Value(v)` yields `succeed(v)`.
    pub fn maybe_call<F>(f: F) -> Self
    where
        F: FnOnce() -> Step<T>,
    {
        match guarded(f) {
            Step::Value(v) => Self::succeed(v),
            Step::Fail(e) => Self::fail(e),
            Step::Wait(d) => d,
        }
    }

    /// Fires with a value.
    ///
    /// # Errors
    ///
    /// Returns [`DeferError::AlreadyFired`] if this deferred already fired.
    pub fn callback(&self, value: T) -> Result<(), DeferError> {
        self.try_fire(Ok(value))
    }

    /// Fires with a failure.
    ///
    /// # Errors
    ///
    /// Returns [`DeferError::AlreadyFired`] if this deferred already fired.
    pub fn errback(&self, error: impl Into<Failure>) -> Result<(), DeferError> {
        self.try_fire(Err(error.into()))
    }

    /// Registers a value handler and an error handler as one link.
    pub fn add_callbacks<F, G>(&self, on_value: F, on_error: G) -> &Self
    where
        F: FnOnce(T) -> Step<T> + 'static,
        G: FnOnce(Failure) -> Step<T> + 'static,
    {
        self.push(Link::Handler(Box::new(move |result| match result {
            Ok(v) => on_value(v),
            Err(e) => on_error(e),
        })))
    }

    /// Registers a value handler; failures pass through untouched.
    pub fn add_callback<F>(&self, on_value: F) -> &Self
    where
        F: FnOnce(T) -> Step<T> + 'static,
    {
        self.push(Link::Handler(Box::new(move |result| match result {
            Ok(v) => on_value(v),
            Err(e) => Step::Fail(e),
        })))
    }

    /// Registers an error handler; values pass through untouched.
    pub fn add_errback<G>(&self, on_error: G) -> &Self
    where
        G: FnOnce(Failure) -> Step<T> + 'static,
    {
        self.push(Link::Handler(Box::new(move |result| match result {
            Ok(v) => Step::Value(v),
            Err(e) => on_error(e),
        })))
    }

    /// Registers one handler for either outcome.
    pub fn add_both<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Result<T, Failure>) -> Step<T> + 'static,
    {
        self.push(Link::Handler(Box::new(handler)))
    }

    /// Continues the chain in a deferred of another type.
    ///
    /// The running result is handed to `f` and taken away from this
    /// deferred; handlers added here afterwards never run.
    pub fn chain<U, F>(&self, f: F) -> Deferred<U>
    where
        U: 'static,
        F: FnOnce(Result<T, Failure>) -> Step<U> + 'static,
    {
        let next = Deferred::new();
        let out = next.clone();
        self.push(Link::Sink(Box::new(move |result| {
            match guarded(move || f(result)) {
                Step::Value(v) => out.fire(Ok(v)),
                Step::Fail(e) => out.fire(Err(e)),
                Step::Wait(child) => {
                    child.push(Link::Sink(Box::new(move |outcome| out.fire(outcome))));
                }
            }
        })));
        next
    }

    /// Returns true once `callback` or `errback` has been called.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.inner.borrow().fired
    }

    /// Returns true while the chain waits on a deferred returned by a handler.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.borrow().pause_count > 0
    }

    /// Returns true if the running result is currently a failure.
    #[must_use]
    pub fn has_failure(&self) -> bool {
        matches!(self.inner.borrow().result, Some(Err(_)))
    }

    /// Returns true if both handles refer to the same deferred.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn push(&self, link: Link<T>) -> &Self {
        self.inner.borrow_mut().handlers.push_back(link);
        self.run_callbacks();
        self
    }

    fn try_fire(&self, result: Result<T, Failure>) -> Result<(), DeferError> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.fired {
                return Err(DeferError::AlreadyFired);
            }
            inner.fired = true;
            inner.result = Some(result);
        }
        self.run_callbacks();
        Ok(())
    }

    /// Fires a deferred this module created and nobody else can fire.
    fn fire(&self, result: Result<T, Failure>) {
        if self.try_fire(result).is_err() {
            debug!("internal deferred fired twice; second result dropped");
        }
    }

    fn resume(&self, outcome: Result<T, Failure>) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.pause_count -= 1;
            inner.result = Some(outcome);
        }
        self.run_callbacks();
    }

    fn run_callbacks(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.fired || inner.draining || inner.pause_count > 0 {
                return;
            }
            inner.draining = true;
        }

        loop {
            let (link, current) = {
                let mut inner = self.inner.borrow_mut();
                if inner.pause_count > 0 {
                    break;
                }
                let Some(link) = inner.handlers.pop_front() else {
                    break;
                };
                match inner.result.take() {
                    Some(current) => (link, current),
                    None => {
                        // Consumed by an earlier sink; nothing left to feed.
                        inner.handlers.clear();
                        break;
                    }
                }
            };

            match link {
                Link::Sink(sink) => sink(current),
                Link::Handler(handler) => match guarded(move || handler(current)) {
                    Step::Value(v) => self.inner.borrow_mut().result = Some(Ok(v)),
                    Step::Fail(e) => self.inner.borrow_mut().result = Some(Err(e)),
                    Step::Wait(child) => {
                        if child.ptr_eq(self) {
                            self.inner.borrow_mut().result =
                                Some(Err(Failure::new(DeferError::ChainedToSelf)));
                            continue;
                        }
                        self.inner.borrow_mut().pause_count += 1;
                        trace!("deferred paused on child");
                        let parent = self.clone();
                        child.push(Link::Sink(Box::new(move |outcome| parent.resume(outcome))));
                    }
                },
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.draining = false;
        if inner.pause_count == 0
            && inner.handlers.is_empty()
            && matches!(inner.result, Some(Err(_)))
        {
            trace!("failure at end of chain, awaiting errback");
        }
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Returns a copy of the running result, if there is one and the chain
    /// is not paused.
    #[must_use]
    pub fn peek_value(&self) -> Option<Result<T, Failure>> {
        let inner = self.inner.borrow();
        if inner.pause_count > 0 {
            return None;
        }
        inner.result.clone()
    }
}

/// Runs `f`, turning a panic into `Step::Fail`.
pub(crate) fn guarded<R: 'static>(f: impl FnOnce() -> Step<R>) -> Step<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(step) => step,
        Err(payload) => Step::Fail(Failure::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::cell::Cell;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn handlers_thread_values_in_order() {
        init_test("handlers_thread_values_in_order");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let d = Deferred::new();
        let s1 = Rc::clone(&seen);
        let s2 = Rc::clone(&seen);
        d.add_callback(move |v: i32| {
            s1.borrow_mut().push(v);
            Step::Value(v + 1)
        })
        .add_errback(|_| Step::Value(-1))
        .add_callback(move |v| {
            s2.borrow_mut().push(v);
            Step::Value(v * 10)
        });
        d.callback(1).unwrap();
        let seen = seen.borrow().clone();
        crate::assert_with_log!(seen == vec![1, 2], "threaded values", vec![1, 2], seen);
        crate::assert_fired_with!(d, 20);
        crate::test_complete!("handlers_thread_values_in_order");
    }

    #[test]
    fn errback_consumes_failure() {
        init_test("errback_consumes_failure");
        let d: Deferred<i32> = Deferred::new();
        let skipped = Rc::new(Cell::new(false));
        let flag = Rc::clone(&skipped);
        d.add_callback(move |v| {
            flag.set(true);
            Step::Value(v)
        })
        .add_errback(|f| {
            assert!(f.is::<Boom>());
            Step::Value(7)
        });
        d.errback(Boom).unwrap();
        crate::assert_with_log!(!skipped.get(), "callback skipped", false, skipped.get());
        crate::assert_fired_with!(d, 7);
        crate::test_complete!("errback_consumes_failure");
    }

    #[test]
    fn second_fire_is_rejected() {
        init_test("second_fire_is_rejected");
        let d = Deferred::new();
        d.callback(1).unwrap();
        let again = d.callback(2);
        crate::assert_with_log!(
            again == Err(DeferError::AlreadyFired),
            "second callback",
            Err::<(), _>(DeferError::AlreadyFired),
            again
        );
        let again = d.errback(Boom);
        crate::assert_with_log!(
            again == Err(DeferError::AlreadyFired),
            "errback after callback",
            Err::<(), _>(DeferError::AlreadyFired),
            again
        );
        crate::assert_fired_with!(d, 1);
        crate::test_complete!("second_fire_is_rejected");
    }

    #[test]
    fn late_handlers_see_early_result() {
        init_test("late_handlers_see_early_result");
        let d = Deferred::succeed("hi".to_owned());
        let got = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&got);
        d.add_callback(move |s| {
            *slot.borrow_mut() = Some(s.clone());
            Step::Value(s)
        });
        let got = got.borrow().clone();
        crate::assert_with_log!(
            got.as_deref() == Some("hi"),
            "late handler",
            Some("hi"),
            got
        );
        crate::test_complete!("late_handlers_see_early_result");
    }

    #[test]
    fn wait_pauses_until_child_fires() {
        init_test("wait_pauses_until_child_fires");
        let child: Deferred<i32> = Deferred::new();
        let parent = Deferred::succeed(1);
        let ran = Rc::new(Cell::new(false));
        let c = child.clone();
        parent.add_callback(move |_| Step::Wait(c));
        let flag = Rc::clone(&ran);
        parent.add_callback(move |v| {
            flag.set(true);
            Step::Value(v + 100)
        });
        crate::assert_with_log!(parent.is_paused(), "paused", true, parent.is_paused());
        crate::assert_with_log!(!ran.get(), "later handler waits", false, ran.get());

        child.callback(5).unwrap();
        crate::assert_with_log!(ran.get(), "resumed", true, ran.get());
        crate::assert_fired_with!(parent, 105);
        crate::test_complete!("wait_pauses_until_child_fires");
    }

    #[test]
    fn wait_on_failed_child_routes_to_errback() {
        init_test("wait_on_failed_child_routes_to_errback");
        let parent = Deferred::succeed(0);
        parent
            .add_callback(|_| Step::Wait(Deferred::fail(Boom)))
            .add_errback(|f| Step::Value(if f.is::<Boom>() { 1 } else { 2 }));
        crate::assert_fired_with!(parent, 1);
        crate::test_complete!("wait_on_failed_child_routes_to_errback");
    }

    #[test]
    fn long_chain_of_resolved_children_is_iterative() {
        init_test("long_chain_of_resolved_children_is_iterative");
        let d = Deferred::new();
        for _ in 0..100_000 {
            d.add_callback(|v: u64| Step::Wait(Deferred::succeed(v + 1)));
        }
        d.callback(0).unwrap();
        crate::assert_fired_with!(d, 100_000);
        crate::test_complete!("long_chain_of_resolved_children_is_iterative");
    }

    #[test]
    fn feeding_during_drain_is_queued() {
        init_test("feeding_during_drain_is_queued");
        let order = Rc::new(RefCell::new(Vec::new()));
        let d = Deferred::new();
        let handle = d.clone();
        let o1 = Rc::clone(&order);
        d.add_callback(move |v: i32| {
            o1.borrow_mut().push("first");
            let o2 = Rc::clone(&o1);
            handle.add_callback(move |v| {
                o2.borrow_mut().push("added-during-drain");
                Step::Value(v)
            });
            o1.borrow_mut().push("first-done");
            Step::Value(v)
        });
        d.callback(0).unwrap();
        let order = order.borrow().clone();
        crate::assert_with_log!(
            order == vec!["first", "first-done", "added-during-drain"],
            "queued not inline",
            vec!["first", "first-done", "added-during-drain"],
            order
        );
        crate::test_complete!("feeding_during_drain_is_queued");
    }

    #[test]
    fn handler_panic_becomes_failure() {
        init_test("handler_panic_becomes_failure");
        let d = Deferred::succeed(1);
        d.add_callback(|_| panic!("handler blew up"));
        crate::assert_failed_with!(d, super::super::PanicError);
        d.add_errback(|_| Step::Value(0));
        crate::test_complete!("handler_panic_becomes_failure");
    }

    #[test]
    fn maybe_call_variants() {
        init_test("maybe_call_variants");
        let ok = Deferred::maybe_call(|| Step::Value(3));
        crate::assert_fired_with!(ok, 3);

        let pending: Deferred<i32> = Deferred::new();
        let p = pending.clone();
        let same = Deferred::maybe_call(move || Step::Wait(p));
        crate::assert_with_log!(same.ptr_eq(&pending), "returned unchanged", true, same.ptr_eq(&pending));

        let failed: Deferred<i32> = Deferred::maybe_call(|| panic!("nope"));
        crate::assert_failed_with!(failed, super::super::PanicError);
        failed.add_errback(|_| Step::Value(0));
        crate::test_complete!("maybe_call_variants");
    }

    #[test]
    fn chain_changes_type() {
        init_test("chain_changes_type");
        let d = Deferred::new();
        let len: Deferred<usize> = d.chain(|r: Result<String, Failure>| r.map(|s| s.len()).into());
        crate::assert_with_log!(!len.is_fired(), "pending", false, len.is_fired());
        d.callback("four".to_owned()).unwrap();
        crate::assert_fired_with!(len, 4);
        crate::test_complete!("chain_changes_type");
    }

    #[test]
    fn returning_self_fails() {
        init_test("returning_self_fails");
        let d: Deferred<i32> = Deferred::new();
        let me = d.clone();
        d.add_callback(move |_| Step::Wait(me));
        d.callback(1).unwrap();
        crate::assert_failed_with!(d, DeferError);
        d.add_errback(|_| Step::Value(0));
        crate::test_complete!("returning_self_fails");
    }

    #[test]
    fn dropped_failure_is_reported() {
        init_test("dropped_failure_is_reported");
        let _ = super::super::take_unhandled_failures();
        drop(Deferred::<i32>::fail(Boom));
        let reported = super::super::take_unhandled_failures();
        crate::assert_with_log!(reported.len() == 1, "one unhandled", 1, reported.len());
        crate::assert_with_log!(reported[0].is::<Boom>(), "kind", "Boom", &reported[0]);

        let handled = Deferred::<i32>::fail(Boom);
        handled.add_errback(|_| Step::Value(0));
        drop(handled);
        let reported = super::super::take_unhandled_failures();
        crate::assert_with_log!(reported.is_empty(), "handled", 0, reported.len());
        crate::test_complete!("dropped_failure_is_reported");
    }
}
