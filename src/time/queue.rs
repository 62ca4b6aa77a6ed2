//! Ordered queue of scheduled calls.
//!
//! Calls are ordered by `(fire_at, insertion sequence)`. Every call also has
//! a [`Ticket`] drawn from one counter shared by one-shot and repeating
//! calls, so removal by ticket does not care which kind it was.

use crate::types::{Ticket, Time};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// A scheduled callable. Shared so it can be invoked without holding a
/// borrow of the queue, and so a repeating call can be re-inserted first.
pub(crate) type Callable = Rc<RefCell<dyn FnMut()>>;

/// Which API registered a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// One-shot, from `set_timeout`.
    Timeout,
    /// Repeating, from `set_interval`.
    Interval,
}

impl CallKind {
    /// Label under which pending calls of this kind are tracked.
    #[must_use]
    pub const fn pending_label(self) -> &'static str {
        match self {
            Self::Timeout => "setTimeout_pending",
            Self::Interval => "setInterval_pending",
        }
    }
}

struct Call {
    ticket: Ticket,
    interval: Option<u64>,
    callable: Callable,
    excluded: bool,
}

/// A call that is due and has been taken off (or rescheduled in) the queue.
pub(crate) struct DueCall {
    pub(crate) ticket: Ticket,
    pub(crate) fire_at: Time,
    pub(crate) callable: Callable,
}

#[derive(Default)]
pub(crate) struct CallQueue {
    calls: BTreeMap<(Time, u64), Call>,
    index: HashMap<Ticket, (Time, u64)>,
    next_ticket: u64,
    next_seq: u64,
    /// New calls are excluded until `clear_exclusions` while this is set.
    excluding: bool,
}

impl CallQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Adds a call at `now + delay` and returns its ticket.
    pub(crate) fn insert(
        &mut self,
        callable: Callable,
        now: Time,
        delay: u64,
        kind: CallKind,
    ) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket::from_raw(self.next_ticket);
        let interval = match kind {
            CallKind::Timeout => None,
            CallKind::Interval => Some(delay),
        };
        let excluded = self.excluding;
        self.place(
            now.saturating_add_millis(delay),
            Call {
                ticket,
                interval,
                callable,
                excluded,
            },
        );
        ticket
    }

    fn place(&mut self, fire_at: Time, call: Call) {
        let key = (fire_at, self.next_seq);
        self.next_seq += 1;
        self.index.insert(call.ticket, key);
        self.calls.insert(key, call);
    }

    /// Removes the call with `ticket`. Unknown tickets are ignored.
    pub(crate) fn remove(&mut self, ticket: Ticket) -> bool {
        match self.index.remove(&ticket) {
            Some(key) => self.calls.remove(&key).is_some(),
            None => false,
        }
    }

    /// Returns true if a call with `ticket` is queued.
    #[cfg(test)]
    pub(crate) fn contains(&self, ticket: Ticket) -> bool {
        self.index.contains_key(&ticket)
    }

    /// Takes the earliest non-excluded call due at `now` (any call when
    /// `force`). A repeating call is re-inserted before it is returned, at
    /// `fire_at + interval`; it stays eligible during this pass unless
    /// `exclude_repeats` is set or its interval is zero.
    pub(crate) fn pop_due(&mut self, now: Time, force: bool, exclude_repeats: bool) -> Option<DueCall> {
        let key = self
            .calls
            .iter()
            .take_while(|((fire_at, _), _)| force || *fire_at <= now)
            .find(|(_, call)| !call.excluded)
            .map(|(key, _)| *key)?;
        let mut call = self.calls.remove(&key)?;
        self.index.remove(&call.ticket);
        let (fire_at, _) = key;
        let due = DueCall {
            ticket: call.ticket,
            fire_at,
            callable: Rc::clone(&call.callable),
        };
        if let Some(interval) = call.interval {
            call.excluded = exclude_repeats || interval == 0;
            self.place(fire_at.saturating_add_millis(interval), call);
        }
        Some(due)
    }

    /// Earliest `fire_at` among queued calls.
    pub(crate) fn next_fire_at(&self) -> Option<Time> {
        self.calls.keys().next().map(|(fire_at, _)| *fire_at)
    }

    pub(crate) fn set_excluding(&mut self, excluding: bool) {
        self.excluding = excluding;
    }

    pub(crate) fn clear_exclusions(&mut self) {
        for call in self.calls.values_mut() {
            call.excluded = false;
        }
    }

    /// Tickets in firing order.
    pub(crate) fn tickets(&self) -> Vec<Ticket> {
        self.calls.values().map(|call| call.ticket).collect()
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

    fn noop() -> Callable {
        Rc::new(RefCell::new(|| {}))
    }

    fn counter(hits: &Rc<Cell<u32>>) -> Callable {
        let hits = Rc::clone(hits);
        Rc::new(RefCell::new(move || hits.set(hits.get() + 1)))
    }

    #[test]
    fn tickets_are_shared_across_kinds() {
        init_test("tickets_are_shared_across_kinds");
        let mut queue = CallQueue::new();
        let a = queue.insert(noop(), Time::ZERO, 10, CallKind::Timeout);
        let b = queue.insert(noop(), Time::ZERO, 10, CallKind::Interval);
        let c = queue.insert(noop(), Time::ZERO, 10, CallKind::Timeout);
        let raw = [a.as_raw(), b.as_raw(), c.as_raw()];
        crate::assert_with_log!(raw == [1, 2, 3], "one counter for both kinds", [1, 2, 3], raw);
        let removed = queue.remove(b);
        crate::assert_with_log!(removed, "removed", true, removed);
        let again = queue.remove(b);
        crate::assert_with_log!(!again, "second removal is a no-op", false, again);
        crate::assert_with_log!(queue.len() == 2, "two left", 2, queue.len());
        crate::test_complete!("tickets_are_shared_across_kinds");
    }

    #[test]
    fn pops_by_time_then_insertion() {
        init_test("pops_by_time_then_insertion");
        let mut queue = CallQueue::new();
        let late = queue.insert(noop(), Time::ZERO, 20, CallKind::Timeout);
        let first = queue.insert(noop(), Time::ZERO, 10, CallKind::Timeout);
        let second = queue.insert(noop(), Time::ZERO, 10, CallKind::Timeout);

        let now = Time::from_millis(20);
        let order: Vec<Ticket> =
            std::iter::from_fn(|| queue.pop_due(now, false, false).map(|d| d.ticket)).collect();
        let expected = vec![first, second, late];
        crate::assert_with_log!(order == expected, "deadline then insertion", expected, order);
        crate::assert_with_log!(queue.is_empty(), "drained", 0, queue.len());
        crate::test_complete!("pops_by_time_then_insertion");
    }

    #[test]
    fn not_yet_due_stays_queued() {
        init_test("not_yet_due_stays_queued");
        let mut queue = CallQueue::new();
        queue.insert(noop(), Time::ZERO, 10, CallKind::Timeout);
        let early = queue.pop_due(Time::from_millis(9), false, false).is_some();
        crate::assert_with_log!(!early, "not due at 9ms", false, early);
        let forced = queue.pop_due(Time::from_millis(9), true, false).is_some();
        crate::assert_with_log!(forced, "force ignores time", true, forced);
        crate::test_complete!("not_yet_due_stays_queued");
    }

    #[test]
    fn excluded_calls_are_skipped_until_cleared() {
        init_test("excluded_calls_are_skipped_until_cleared");
        let mut queue = CallQueue::new();
        queue.set_excluding(true);
        let excluded = queue.insert(noop(), Time::ZERO, 0, CallKind::Timeout);
        queue.set_excluding(false);
        let eligible = queue.insert(noop(), Time::ZERO, 0, CallKind::Timeout);

        let due = queue.pop_due(Time::ZERO, false, false).map(|d| d.ticket);
        crate::assert_with_log!(due == Some(eligible), "eligible first", Some(eligible), due);
        let rest = queue.pop_due(Time::ZERO, false, false).map(|d| d.ticket);
        crate::assert_with_log!(rest.is_none(), "excluded skipped", None::<Ticket>, rest);

        queue.clear_exclusions();
        let due = queue.pop_due(Time::ZERO, false, false).map(|d| d.ticket);
        crate::assert_with_log!(due == Some(excluded), "eligible again", Some(excluded), due);
        crate::test_complete!("excluded_calls_are_skipped_until_cleared");
    }

    #[test]
    fn intervals_are_rescheduled_before_returning() {
        init_test("intervals_are_rescheduled_before_returning");
        let hits = Rc::new(Cell::new(0));
        let mut queue = CallQueue::new();
        let ticket = queue.insert(counter(&hits), Time::ZERO, 2, CallKind::Interval);

        let due = queue.pop_due(Time::from_millis(7), false, false).map(|d| (d.ticket, d.fire_at));
        let expected = Some((ticket, Time::from_millis(2)));
        crate::assert_with_log!(due == expected, "first deadline", expected, due);
        let kept = queue.contains(ticket);
        crate::assert_with_log!(kept, "rescheduled under the same ticket", true, kept);
        let next = queue.next_fire_at();
        crate::assert_with_log!(
            next == Some(Time::from_millis(4)),
            "next deadline",
            Some(Time::from_millis(4)),
            next
        );
        crate::test_complete!("intervals_are_rescheduled_before_returning");
    }

    #[test]
    fn zero_interval_is_excluded_after_reschedule() {
        init_test("zero_interval_is_excluded_after_reschedule");
        let mut queue = CallQueue::new();
        queue.insert(noop(), Time::ZERO, 0, CallKind::Interval);
        let first = queue.pop_due(Time::ZERO, false, false).is_some();
        crate::assert_with_log!(first, "fires once", true, first);
        let spun = queue.pop_due(Time::ZERO, false, false).is_some();
        crate::assert_with_log!(!spun, "no spin on zero interval", false, spun);
        crate::assert_with_log!(queue.len() == 1, "still queued", 1, queue.len());
        crate::test_complete!("zero_interval_is_excluded_after_reschedule");
    }
}
