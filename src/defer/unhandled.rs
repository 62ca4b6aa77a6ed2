//! Per-thread record of failures nobody handled.

use super::failure::Failure;
use crate::tracing_compat::error;
use std::cell::RefCell;

thread_local! {
    static UNHANDLED: RefCell<Vec<Failure>> = const { RefCell::new(Vec::new()) };
}

/// Logs `failure` and appends it to this thread's unhandled log.
pub(crate) fn report(failure: Failure) {
    error!(failure = %failure, "unhandled failure in deferred");
    // The log may already be torn down while the thread exits.
    let _ = UNHANDLED.try_with(|log| log.borrow_mut().push(failure));
}

/// Drains and returns the failures this thread has reported as unhandled.
///
/// A failure lands here when the last handle to a [`Deferred`] holding it
/// is dropped, or when an [`EventualQueue`] callback panics.
///
/// [`Deferred`]: super::Deferred
/// [`EventualQueue`]: crate::eventual::EventualQueue
#[must_use]
pub fn take_unhandled_failures() -> Vec<Failure> {
    UNHANDLED
        .try_with(|log| std::mem::take(&mut *log.borrow_mut()))
        .unwrap_or_default()
}
