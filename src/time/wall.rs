//! Real-time scheduler.
//!
//! Same call-queue semantics as the virtual clock, but "now" is elapsed
//! wall-clock time since the scheduler was created and [`park`] sleeps.
//!
//! [`park`]: Scheduler::park

use super::queue::{CallKind, CallQueue};
use super::scheduler::Scheduler;
use crate::error::ClockAdvanceError;
use crate::tracing_compat::trace;
use crate::types::{Ticket, Time};
use core::fmt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A source of the current time.
pub trait TimeSource {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Wall clock time source.
///
/// Uses `std::time::Instant` internally. The epoch is the time when this
/// source was created.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a wall clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::ZERO + self.epoch.elapsed()
    }
}

/// Scheduler driven by real elapsed time.
pub struct WallClockScheduler<S: TimeSource = WallClock> {
    source: S,
    queue: RefCell<CallQueue>,
    turning: Cell<bool>,
}

impl WallClockScheduler {
    /// Creates a scheduler on a fresh wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(WallClock::new())
    }
}

impl Default for WallClockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TimeSource> WallClockScheduler<S> {
    /// Creates a scheduler reading time from `source`.
    #[must_use]
    pub fn with_source(source: S) -> Self {
        Self {
            source,
            queue: RefCell::new(CallQueue::new()),
            turning: Cell::new(false),
        }
    }

    /// Wraps the scheduler for use as a shared [`Scheduler`].
    #[must_use]
    pub fn into_shared(self) -> Rc<dyn Scheduler>
    where
        S: 'static,
    {
        Rc::new(self)
    }
}

impl<S: TimeSource> fmt::Debug for WallClockScheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WallClockScheduler")
            .field("now", &self.source.now())
            .field("pending", &self.queue.try_borrow().map(|q| q.len()).ok())
            .finish_non_exhaustive()
    }
}

impl<S: TimeSource> Scheduler for WallClockScheduler<S> {
    fn set_timeout(&self, callable: Box<dyn FnMut()>, delay_ms: u64) -> Ticket {
        let now = self.source.now();
        self.queue.borrow_mut().insert(
            Rc::new(RefCell::new(callable)),
            now,
            delay_ms,
            CallKind::Timeout,
        )
    }

    fn set_interval(&self, callable: Box<dyn FnMut()>, interval_ms: u64) -> Ticket {
        let now = self.source.now();
        self.queue.borrow_mut().insert(
            Rc::new(RefCell::new(callable)),
            now,
            interval_ms,
            CallKind::Interval,
        )
    }

    fn clear_timeout(&self, ticket: Ticket) {
        self.queue.borrow_mut().remove(ticket);
    }

    fn clear_interval(&self, ticket: Ticket) {
        self.queue.borrow_mut().remove(ticket);
    }

    fn now(&self) -> Time {
        self.source.now()
    }

    fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Calls added during a turn wait for the next one, as on the virtual clock.
    fn turn(&self) -> Result<usize, ClockAdvanceError> {
        if self.turning.replace(true) {
            return Err(ClockAdvanceError::Reentrant);
        }
        let _reset = TurnReset(self);
        self.queue.borrow_mut().set_excluding(true);
        let now = self.source.now();
        let mut fired = 0;
        loop {
            let due = self.queue.borrow_mut().pop_due(now, false, false);
            let Some(due) = due else {
                break;
            };
            fired += 1;
            (&mut *due.callable.borrow_mut())();
        }
        if fired > 0 {
            trace!(fired, now = %now, "wall-clock turn");
        }
        Ok(fired)
    }

    fn park(&self) -> bool {
        let next = self.queue.borrow().next_fire_at();
        let Some(at) = next else {
            return false;
        };
        let wait = at.duration_since(self.source.now());
        if wait > 0 {
            std::thread::sleep(Duration::from_millis(wait));
        }
        true
    }
}

struct TurnReset<'a, S: TimeSource>(&'a WallClockScheduler<S>);

impl<S: TimeSource> Drop for TurnReset<'_, S> {
    fn drop(&mut self) {
        let mut queue = self.0.queue.borrow_mut();
        queue.set_excluding(false);
        queue.clear_exclusions();
        self.0.turning.set(false);
    }
}
