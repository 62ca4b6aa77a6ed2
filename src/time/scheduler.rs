//! The scheduling interface test code and the runner share.

use crate::error::ClockAdvanceError;
use crate::types::{Ticket, Time};

/// Timer registration plus a way to pump whatever became due.
///
/// Implemented by [`VirtualClock`](super::VirtualClock) for deterministic
/// runs, by [`WallClockScheduler`](super::WallClockScheduler) for real time,
/// and by the runner's per-test tracking wrapper. The runner is handed one of
/// these instead of reaching for ambient timers, so which notion of time a
/// run uses is decided by whoever builds the runner.
pub trait Scheduler {
    /// Runs `callable` once, `delay_ms` from now.
    fn set_timeout(&self, callable: Box<dyn FnMut()>, delay_ms: u64) -> Ticket;

    /// Runs `callable` every `interval_ms` until cleared.
    fn set_interval(&self, callable: Box<dyn FnMut()>, interval_ms: u64) -> Ticket;

    /// Removes a pending call; also accepts interval tickets.
    fn clear_timeout(&self, ticket: Ticket);

    /// Removes a pending call; also accepts timeout tickets.
    fn clear_interval(&self, ticket: Ticket);

    /// The scheduler's current time.
    fn now(&self) -> Time;

    /// Number of calls still scheduled.
    fn pending(&self) -> usize;

    /// Runs every call due now and returns how many ran.
    fn turn(&self) -> Result<usize, ClockAdvanceError>;

    /// Waits until the next call is due. Returns false if nothing is scheduled.
    fn park(&self) -> bool;
}
