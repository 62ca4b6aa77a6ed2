//! Deterministic virtual-time scheduler.

use super::queue::{CallKind, CallQueue, Callable};
use super::scheduler::Scheduler;
use crate::error::ClockAdvanceError;
use crate::tracing_compat::{trace, warn};
use crate::types::{Ticket, Time};
use core::fmt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct ClockCore {
    now: Cell<Time>,
    queue: RefCell<CallQueue>,
    advancing: Cell<bool>,
}

/// Marks a clock as advancing; undone on drop, including during unwinding.
struct AdvanceGuard<'a> {
    core: &'a ClockCore,
}

impl<'a> AdvanceGuard<'a> {
    fn enter(core: &'a ClockCore) -> Result<Self, ClockAdvanceError> {
        if core.advancing.replace(true) {
            warn!("re-entrant clock advance rejected");
            return Err(ClockAdvanceError::Reentrant);
        }
        core.queue.borrow_mut().set_excluding(true);
        Ok(Self { core })
    }
}

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.core.queue.borrow_mut();
        queue.set_excluding(false);
        queue.clear_exclusions();
        self.core.advancing.set(false);
    }
}

/// A scheduler whose time moves only when told to.
///
/// Cloning a `VirtualClock` clones the handle; clones share one call list.
/// Two clocks created with [`new`](Self::new) never share anything.
///
/// Calls registered while the clock is advancing wait for the next
/// [`advance`](Self::advance), even with a zero delay, so a callable that
/// reschedules itself cannot spin one advance forever.
///
/// # Example
///
/// ```
/// use deferlab::time::VirtualClock;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let clock = VirtualClock::new();
/// let hits = Rc::new(Cell::new(0));
/// let h = Rc::clone(&hits);
/// clock.set_timeout(move || h.set(h.get() + 1), 10);
///
/// clock.advance(9).unwrap();
/// assert_eq!(hits.get(), 0);
/// clock.advance(1).unwrap();
/// assert_eq!(hits.get(), 1);
/// ```
#[derive(Clone)]
pub struct VirtualClock {
    core: Rc<ClockCore>,
}

impl VirtualClock {
    /// Creates a clock at time zero with nothing scheduled.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Time::ZERO)
    }

    /// Creates a clock at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            core: Rc::new(ClockCore {
                now: Cell::new(time),
                queue: RefCell::new(CallQueue::new()),
                advancing: Cell::new(false),
            }),
        }
    }

    /// Schedules `f` to run once, `delay_ms` from now.
    pub fn set_timeout(&self, f: impl FnMut() + 'static, delay_ms: u64) -> Ticket {
        self.schedule(Rc::new(RefCell::new(f)), delay_ms, CallKind::Timeout)
    }

    /// Schedules `f` to run every `interval_ms`, first at now + `interval_ms`.
    pub fn set_interval(&self, f: impl FnMut() + 'static, interval_ms: u64) -> Ticket {
        self.schedule(Rc::new(RefCell::new(f)), interval_ms, CallKind::Interval)
    }

    fn schedule(&self, callable: Callable, delay_ms: u64, kind: CallKind) -> Ticket {
        let ticket = self
            .core
            .queue
            .borrow_mut()
            .insert(callable, self.core.now.get(), delay_ms, kind);
        trace!(ticket = %ticket, delay_ms, ?kind, "virtual call scheduled");
        ticket
    }

    /// Removes a pending call. Works for intervals too; unknown tickets are ignored.
    pub fn clear_timeout(&self, ticket: Ticket) {
        self.core.queue.borrow_mut().remove(ticket);
    }

    /// Removes a pending call. Works for timeouts too; unknown tickets are ignored.
    pub fn clear_interval(&self, ticket: Ticket) {
        self.core.queue.borrow_mut().remove(ticket);
    }

    /// Moves time forward by `amount_ms` and runs every call that became due,
    /// in `(fire_at, insertion)` order. Returns how many calls ran.
    ///
    /// If a callable panics, the panic propagates; calls still due run on
    /// the next advance.
    ///
    /// # Errors
    ///
    /// [`ClockAdvanceError::Negative`] for a negative amount, and
    /// [`ClockAdvanceError::Reentrant`] when called from inside a callable
    /// this clock is running. Neither changes the clock.
    pub fn advance(&self, amount_ms: i64) -> Result<usize, ClockAdvanceError> {
        let Ok(amount) = u64::try_from(amount_ms) else {
            return Err(ClockAdvanceError::Negative { amount: amount_ms });
        };
        let guard = AdvanceGuard::enter(&self.core)?;
        let now = self.core.now.get().saturating_add_millis(amount);
        self.core.now.set(now);
        trace!(now = %now, amount_ms = amount, "clock advance");
        Ok(self.run_due(&guard, false))
    }

    /// Runs every pending call once regardless of when it is due, without
    /// moving time. Returns how many calls ran.
    ///
    /// # Errors
    ///
    /// [`ClockAdvanceError::Reentrant`] when called from inside a callable.
    pub fn fire_everything(&self) -> Result<usize, ClockAdvanceError> {
        let guard = AdvanceGuard::enter(&self.core)?;
        Ok(self.run_due(&guard, true))
    }

    fn run_due(&self, _guard: &AdvanceGuard<'_>, force: bool) -> usize {
        let mut fired = 0;
        loop {
            let now = self.core.now.get();
            let due = self.core.queue.borrow_mut().pop_due(now, force, force);
            let Some(due) = due else {
                break;
            };
            trace!(ticket = %due.ticket, fire_at = %due.fire_at, "virtual call firing");
            fired += 1;
            (&mut *due.callable.borrow_mut())();
        }
        fired
    }

    /// Current virtual time in milliseconds.
    #[must_use]
    pub fn time(&self) -> u64 {
        self.core.now.get().as_millis()
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.core.now.get()
    }

    /// Overwrites the current time without running anything. May move backwards.
    pub fn set_time(&self, millis: u64) {
        self.core.now.set(Time::from_millis(millis));
    }

    /// A date source whose `get_time` follows this clock.
    #[must_use]
    pub fn date(&self) -> VirtualDate {
        VirtualDate {
            clock: self.clone(),
        }
    }

    /// Number of pending calls.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.core.queue.borrow().len()
    }

    /// Tickets of pending calls, in firing order.
    #[must_use]
    pub fn pending_tickets(&self) -> Vec<Ticket> {
        self.core.queue.borrow().tickets()
    }

    /// True while `advance` or `fire_everything` is running.
    #[must_use]
    pub fn is_advancing(&self) -> bool {
        self.core.advancing.get()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("now", &self.core.now.get())
            .field("pending", &self.core.queue.try_borrow().map(|q| q.len()).ok())
            .field("advancing", &self.core.advancing.get())
            .finish()
    }
}

impl Scheduler for VirtualClock {
    fn set_timeout(&self, callable: Box<dyn FnMut()>, delay_ms: u64) -> Ticket {
        self.schedule(Rc::new(RefCell::new(callable)), delay_ms, CallKind::Timeout)
    }

    fn set_interval(&self, callable: Box<dyn FnMut()>, interval_ms: u64) -> Ticket {
        self.schedule(Rc::new(RefCell::new(callable)), interval_ms, CallKind::Interval)
    }

    fn clear_timeout(&self, ticket: Ticket) {
        Self::clear_timeout(self, ticket);
    }

    fn clear_interval(&self, ticket: Ticket) {
        Self::clear_interval(self, ticket);
    }

    fn now(&self) -> Time {
        Self::now(self)
    }

    fn pending(&self) -> usize {
        Self::pending(self)
    }

    fn turn(&self) -> Result<usize, ClockAdvanceError> {
        self.advance(0)
    }

    /// Jumps virtual time to the next pending call.
    fn park(&self) -> bool {
        let next = self.core.queue.borrow().next_fire_at();
        match next {
            Some(at) => {
                if at > self.core.now.get() {
                    self.core.now.set(at);
                }
                true
            }
            None => false,
        }
    }
}

/// Stand-in for a wall-clock date: reads the virtual clock it came from.
#[derive(Debug, Clone)]
pub struct VirtualDate {
    clock: VirtualClock,
}

impl VirtualDate {
    /// Milliseconds since the clock's epoch, as of the clock's current time.
    #[must_use]
    pub fn get_time(&self) -> u64 {
        self.clock.time()
    }
}
