//! Error types for deferlab.
//!
//! Programmer errors (firing a deferred twice, advancing a clock from inside
//! one of its own callables) are returned as typed errors instead of
//! corrupting state. Failures that flow *through* a deferred chain are carried
//! by [`Failure`](crate::defer::Failure), which can wrap any of these.

use thiserror::Error;

/// Misuse of a [`Deferred`](crate::defer::Deferred).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeferError {
    /// `callback`/`errback` was called on a deferred that already fired.
    #[error("deferred has already fired")]
    AlreadyFired,
    /// A handler returned the very deferred it was attached to.
    #[error("a handler returned its own deferred")]
    ChainedToSelf,
}

/// Rejected [`VirtualClock`](crate::time::VirtualClock) advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockAdvanceError {
    /// The advance amount was negative.
    #[error("amount was {amount}ms, should have been >= 0")]
    Negative {
        /// The rejected amount in milliseconds.
        amount: i64,
    },
    /// The clock is already advancing (a callable tried to advance its own clock).
    #[error("cannot re-entrantly advance the clock")]
    Reentrant,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading a config file.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error in a file or an override value.
    #[error("config parse error: {0}")]
    Parse(String),
    /// `yield_every` was zero.
    #[error("yield_every must be > 0")]
    InvalidYieldEvery,
    /// `stall_limit` was zero.
    #[error("stall_limit must be > 0")]
    InvalidStallLimit,
    /// Unknown override key.
    #[error("invalid override: {0}")]
    InvalidOverride(String),
}

/// Errors from driving a run to completion.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The run's completion deferred never fired and no test started or
    /// finished for `stall_limit` scheduler rounds in a row.
    #[error("run stalled after {rounds} rounds without a test starting or finishing")]
    Stalled {
        /// Number of consecutive rounds without progress.
        rounds: usize,
    },
    /// The scheduler refused to advance.
    #[error(transparent)]
    Clock(#[from] ClockAdvanceError),
    /// Writing a report failed.
    #[error("report output failed: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
