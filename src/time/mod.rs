//! Scheduling and time.
//!
//! - [`Scheduler`]: timer registration and pumping, injected into the runner
//! - [`VirtualClock`]: deterministic scheduler for tests
//! - [`WallClockScheduler`]: real elapsed time
//! - [`VirtualDate`]: a date whose `get_time` follows a virtual clock

pub mod clock;
mod queue;
pub mod scheduler;
pub mod wall;

pub use clock::{VirtualClock, VirtualDate};
pub use queue::CallKind;
pub use scheduler::Scheduler;
pub use wall::{TimeSource, WallClock, WallClockScheduler};
