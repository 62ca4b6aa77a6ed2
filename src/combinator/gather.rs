//! Collect the values of many deferreds, failing on the first failure.

use super::deferred_list::DeferredList;
use crate::defer::{Deferred, Step};

/// Waits for every child and fires with their values in child order.
///
/// The first child failure fails the whole operation with a
/// [`FirstError`](super::FirstError) naming that child. Child failures are
/// not consumed, so each failed child still reports its own failure if
/// nothing else handles it.
#[must_use]
pub fn gather_results<T: Clone + 'static>(children: Vec<Deferred<T>>) -> Deferred<Vec<T>> {
    DeferredList::builder(children)
        .fire_on_one_errback(true)
        .build()
        .chain(|outcome| match outcome {
            Ok(list) => list.into_values().into(),
            Err(failure) => Step::Fail(failure),
        })
}
