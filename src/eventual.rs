//! Run callbacks on a later scheduler turn.
//!
//! [`EventualQueue`] batches callbacks into a single zero-delay call on the
//! scheduler it was built with. Callbacks queued while a batch is running
//! wait for the next batch, so a callback that keeps re-queueing itself
//! cannot starve the scheduler.

use crate::defer::{Deferred, Failure, report_unhandled};
use crate::time::Scheduler;
use crate::tracing_compat::trace;
use crate::types::Ticket;
use core::fmt;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

type Event = Box<dyn FnOnce()>;

struct QueueInner {
    scheduler: Rc<dyn Scheduler>,
    events: RefCell<Vec<Event>>,
    timer: Cell<Option<Ticket>>,
    flush_observers: RefCell<Vec<Deferred<()>>>,
}

impl QueueInner {
    fn append(self: &Rc<Self>, event: Event) {
        self.events.borrow_mut().push(event);
        if self.timer.get().is_none() {
            self.schedule_turn();
        }
    }

    fn schedule_turn(self: &Rc<Self>) {
        let queue = Rc::clone(self);
        let ticket = self
            .scheduler
            .set_timeout(Box::new(move || queue.turn()), 0);
        self.timer.set(Some(ticket));
    }

    fn turn(self: &Rc<Self>) {
        self.timer.set(None);
        let batch = std::mem::take(&mut *self.events.borrow_mut());
        trace!(events = batch.len(), "eventual queue turn");
        for event in batch {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(event)) {
                report_unhandled(Failure::from_panic(payload));
            }
        }

        if self.events.borrow().is_empty() {
            let observers = std::mem::take(&mut *self.flush_observers.borrow_mut());
            for observer in observers {
                let _ = observer.callback(());
            }
        } else if self.timer.get().is_none() {
            self.schedule_turn();
        }
    }
}

/// A queue of callbacks run in batches on later scheduler turns.
#[derive(Clone)]
pub struct EventualQueue {
    inner: Rc<QueueInner>,
}

impl EventualQueue {
    /// Creates an empty queue on `scheduler`.
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                scheduler,
                events: RefCell::new(Vec::new()),
                timer: Cell::new(None),
                flush_observers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Runs `callback` on a later turn.
    ///
    /// A panicking callback is recorded as an unhandled failure and the rest
    /// of its batch still runs.
    pub fn eventually(&self, callback: impl FnOnce() + 'static) {
        self.inner.append(Box::new(callback));
    }

    /// Returns a deferred that fires with `value` on a later turn.
    pub fn fire_eventually<T: 'static>(&self, value: T) -> Deferred<T> {
        let d = Deferred::new();
        let fire = d.clone();
        self.eventually(move || {
            let _ = fire.callback(value);
        });
        d
    }

    /// Returns a deferred that fires once the queue has nothing left to run.
    #[must_use]
    pub fn flush(&self) -> Deferred<()> {
        if self.inner.events.borrow().is_empty() {
            return Deferred::succeed(());
        }
        let d = Deferred::new();
        self.inner.flush_observers.borrow_mut().push(d.clone());
        d
    }

    /// Number of callbacks waiting for a turn.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.events.borrow().len()
    }

    /// True if no callbacks are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EventualQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventualQueue")
            .field("queued", &self.inner.events.try_borrow().map(|e| e.len()).ok())
            .field("timer", &self.inner.timer.get())
            .finish_non_exhaustive()
    }
}
