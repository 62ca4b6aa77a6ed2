//! Deferred results with chained callbacks.
//!
//! - [`Deferred`]: single-assignment result cell with ordered handlers
//! - [`Step`]: what a handler returns (value, failure, or a deferred to wait on)
//! - [`Failure`]: the error half of a result, with typed [`check`](Failure::check)
//! - [`take_unhandled_failures`]: failures dropped without an errback
//!
//! # Example
//!
//! ```
//! use deferlab::defer::{Deferred, Step};
//!
//! let d = Deferred::new();
//! d.add_callback(|v: i32| Step::Value(v * 2))
//!     .add_errback(|_| Step::Value(0));
//! d.callback(21).unwrap();
//! assert_eq!(d.peek_value().unwrap().unwrap(), 42);
//! ```

pub mod deferred;
pub mod failure;
mod unhandled;

pub use deferred::{Deferred, Step};
pub(crate) use deferred::guarded;
pub use failure::{Failure, PanicError};
pub use unhandled::take_unhandled_failures;
pub(crate) use unhandled::report as report_unhandled;
