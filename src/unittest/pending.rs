//! Per-test registry of scheduled calls that have not run yet.
//!
//! Test code reaches timers through a [`TrackingScheduler`], which records
//! every ticket it hands out in a [`PendingCalls`] registry and forgets it
//! again when the call fires (one-shot) or is cleared. Whatever is left after
//! tearDown was leaked by the test.
//!
//! A tracked call that panics does not unwind into the scheduler. While its
//! test is still running the panic is kept in the registry and reported as an
//! error of that test; afterwards it goes to the unhandled-failure log.

use crate::defer::{Failure, report_unhandled};
use crate::error::ClockAdvanceError;
use crate::time::{CallKind, Scheduler};
use crate::tracing_compat::{error, trace, warn};
use crate::types::{Ticket, Time};
use core::fmt;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use thiserror::Error;

/// A test left scheduled calls behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Test ended with {count} pending call(s): {}", kinds.join(","))]
pub struct PendingCallsError {
    /// Number of leaked calls.
    pub count: usize,
    /// Kind label of each leaked call, in registry order.
    pub kinds: Vec<String>,
}

/// Tickets handed out to one test and not yet fired or cleared, by kind.
#[derive(Default)]
pub struct PendingCalls {
    calls: RefCell<BTreeMap<&'static str, BTreeSet<Ticket>>>,
    failures: RefCell<Vec<Failure>>,
    closed: Cell<bool>,
}

impl PendingCalls {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, kind: CallKind, ticket: Ticket) {
        self.calls
            .borrow_mut()
            .entry(kind.pending_label())
            .or_default()
            .insert(ticket);
    }

    pub(crate) fn remove(&self, ticket: Ticket) {
        for tickets in self.calls.borrow_mut().values_mut() {
            tickets.remove(&ticket);
        }
    }

    fn record_failure(&self, failure: Failure) {
        if self.closed.get() {
            report_unhandled(failure);
        } else {
            warn!(error = %failure, "scheduled call panicked");
            self.failures.borrow_mut().push(failure);
        }
    }

    /// Drains the panics of tracked calls recorded so far. Calls that panic
    /// after this go to the unhandled-failure log instead.
    #[must_use]
    pub fn take_failures(&self) -> Vec<Failure> {
        self.closed.set(true);
        self.failures.take()
    }

    /// Number of tracked calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.borrow().values().map(BTreeSet::len).sum()
    }

    /// True if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked `(kind, ticket)` pairs.
    #[must_use]
    pub fn entries(&self) -> Vec<(&'static str, Ticket)> {
        self.calls
            .borrow()
            .iter()
            .flat_map(|(kind, tickets)| tickets.iter().map(move |t| (*kind, *t)))
            .collect()
    }

    /// Empties the registry, logging every leftover call.
    ///
    /// # Errors
    ///
    /// Returns a [`PendingCallsError`] describing the leftovers, if any.
    pub fn check_and_reset(&self) -> Result<(), PendingCallsError> {
        let leftover = self.entries();
        self.calls.borrow_mut().clear();
        if leftover.is_empty() {
            return Ok(());
        }
        for (kind, ticket) in &leftover {
            error!(kind = %kind, ticket = %ticket, "leftover pending call");
        }
        Err(PendingCallsError {
            count: leftover.len(),
            kinds: leftover.iter().map(|(kind, _)| (*kind).to_owned()).collect(),
        })
    }
}

/// Runs `callable`, routing a panic to `registry` or, once it is gone, to the
/// unhandled-failure log.
fn run_guarded(registry: &Weak<PendingCalls>, callable: &mut dyn FnMut()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callable())) {
        let failure = Failure::from_panic(payload);
        match registry.upgrade() {
            Some(pending) => pending.record_failure(failure),
            None => report_unhandled(failure),
        }
    }
}

impl fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

/// A [`Scheduler`] that records what it schedules in a [`PendingCalls`].
pub struct TrackingScheduler {
    inner: Rc<dyn Scheduler>,
    pending: Rc<PendingCalls>,
}

impl TrackingScheduler {
    /// Wraps `inner`, recording into `pending`.
    #[must_use]
    pub fn new(inner: Rc<dyn Scheduler>, pending: Rc<PendingCalls>) -> Self {
        Self { inner, pending }
    }

    /// The registry calls are recorded in.
    #[must_use]
    pub fn pending_calls(&self) -> &Rc<PendingCalls> {
        &self.pending
    }
}

impl fmt::Debug for TrackingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingScheduler")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Scheduler for TrackingScheduler {
    fn set_timeout(&self, mut callable: Box<dyn FnMut()>, delay_ms: u64) -> Ticket {
        let slot = Rc::new(Cell::new(None));
        let (registry, own) = (Rc::downgrade(&self.pending), Rc::clone(&slot));
        let ticket = self.inner.set_timeout(
            Box::new(move || {
                if let (Some(pending), Some(ticket)) = (registry.upgrade(), own.get()) {
                    pending.remove(ticket);
                }
                run_guarded(&registry, &mut *callable);
            }),
            delay_ms,
        );
        slot.set(Some(ticket));
        self.pending.insert(CallKind::Timeout, ticket);
        trace!(ticket = %ticket, delay_ms, "tracked timeout");
        ticket
    }

    fn set_interval(&self, mut callable: Box<dyn FnMut()>, interval_ms: u64) -> Ticket {
        let registry = Rc::downgrade(&self.pending);
        let ticket = self
            .inner
            .set_interval(Box::new(move || run_guarded(&registry, &mut *callable)), interval_ms);
        self.pending.insert(CallKind::Interval, ticket);
        trace!(ticket = %ticket, interval_ms, "tracked interval");
        ticket
    }

    fn clear_timeout(&self, ticket: Ticket) {
        self.inner.clear_timeout(ticket);
        self.pending.remove(ticket);
    }

    fn clear_interval(&self, ticket: Ticket) {
        self.inner.clear_interval(ticket);
        self.pending.remove(ticket);
    }

    fn now(&self) -> Time {
        self.inner.now()
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }

    fn turn(&self) -> Result<usize, ClockAdvanceError> {
        self.inner.turn()
    }

    fn park(&self) -> bool {
        self.inner.park()
    }
}
