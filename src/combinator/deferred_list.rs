//! Aggregate many deferreds into one.
//!
//! A [`DeferredList`] watches N children and fires its own deferred once,
//! either early (first success or first failure, when asked to) or when
//! every child has finished. Results are stored at each child's own index,
//! whatever order the children finish in.

use crate::defer::{Deferred, Failure, Step};
use crate::tracing_compat::trace;
use core::fmt;
use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::Rc;

/// One child's recorded outcome.
#[derive(Debug, Clone)]
pub struct ListEntry<T> {
    /// The child's position in the input list.
    pub index: usize,
    /// What the child fired with.
    pub outcome: Result<T, Failure>,
}

impl<T> ListEntry<T> {
    /// True if the child fired with a value.
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// What a [`DeferredList`] fires with.
#[derive(Debug, Clone)]
pub enum ListOutcome<T> {
    /// Every child finished; one entry per child, in child order.
    All(Vec<ListEntry<T>>),
    /// A child succeeded and `fire_on_one_callback` was set.
    First {
        /// The winning child's value.
        value: T,
        /// The winning child's index.
        index: usize,
    },
}

impl<T> ListOutcome<T> {
    /// Unwraps the `(success, value)` entries into plain values.
    ///
    /// # Errors
    ///
    /// Returns the first failed entry's failure.
    pub fn into_values(self) -> Result<Vec<T>, Failure> {
        match self {
            Self::All(entries) => entries.into_iter().map(|e| e.outcome).collect(),
            Self::First { value, .. } => Ok(vec![value]),
        }
    }
}

/// The failure a [`DeferredList`] fires with when `fire_on_one_errback` is set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("FirstError[#{index}, {error}]")]
pub struct FirstError {
    /// The child's failure.
    pub error: Failure,
    /// The failing child's index.
    pub index: usize,
}

struct ListState<T: 'static> {
    slots: RefCell<Vec<Option<ListEntry<T>>>>,
    finished: Cell<usize>,
    fire_on_one_callback: bool,
    fire_on_one_errback: bool,
    consume: Option<Box<dyn Fn() -> T>>,
    aggregate: Deferred<ListOutcome<T>>,
}

impl<T: Clone + 'static> ListState<T> {
    fn record(&self, index: usize, outcome: Result<T, Failure>) {
        let succeeded = outcome.is_ok();
        self.slots.borrow_mut()[index] = Some(ListEntry {
            index,
            outcome: outcome.clone(),
        });
        let finished = self.finished.get() + 1;
        self.finished.set(finished);
        trace!(index, succeeded, finished, "deferred list child finished");

        if self.aggregate.is_fired() {
            return;
        }
        match outcome {
            Ok(value) if self.fire_on_one_callback => {
                let _ = self.aggregate.callback(ListOutcome::First { value, index });
            }
            Err(error) if self.fire_on_one_errback => {
                let _ = self.aggregate.errback(FirstError { error, index });
            }
            _ => {
                if finished == self.slots.borrow().len() {
                    let entries = self.slots.borrow_mut().drain(..).flatten().collect();
                    let _ = self.aggregate.callback(ListOutcome::All(entries));
                }
            }
        }
    }
}

/// Options for building a [`DeferredList`].
pub struct DeferredListBuilder<T: 'static> {
    children: Vec<Deferred<T>>,
    fire_on_one_callback: bool,
    fire_on_one_errback: bool,
    consume: Option<Box<dyn Fn() -> T>>,
}

impl<T: Clone + 'static> DeferredListBuilder<T> {
    /// Fire as soon as any child succeeds, with that child's value and index.
    #[must_use]
    pub fn fire_on_one_callback(mut self, enabled: bool) -> Self {
        self.fire_on_one_callback = enabled;
        self
    }

    /// Fail as soon as any child fails, with a [`FirstError`].
    #[must_use]
    pub fn fire_on_one_errback(mut self, enabled: bool) -> Self {
        self.fire_on_one_errback = enabled;
        self
    }

    /// Swallow child failures, continuing each failed child's own chain with
    /// `replacement()` in place of its failure.
    ///
    /// The failure itself is still recorded in the list's entry for that
    /// child. Handlers added to the child afterwards see the replacement as an
    /// ordinary value, so pick one they can tell apart.
    #[must_use]
    pub fn consume_errors_with(mut self, replacement: impl Fn() -> T + 'static) -> Self {
        self.consume = Some(Box::new(replacement));
        self
    }

    /// Builds the list and attaches it to every child.
    #[must_use]
    pub fn build(self) -> DeferredList<T> {
        DeferredList::attach(self)
    }
}

impl<T: Clone + Default + 'static> DeferredListBuilder<T> {
    /// Swallow child failures: each failed child continues with
    /// `T::default()` instead of its failure, so it is not reported unhandled.
    ///
    /// Later handlers on the child see that default as a success value. Use
    /// [`consume_errors_with`](Self::consume_errors_with) to choose the
    /// replacement, or when `T` has no default.
    #[must_use]
    pub fn consume_errors(mut self, enabled: bool) -> Self {
        self.consume = if enabled {
            Some(Box::new(T::default))
        } else {
            None
        };
        self
    }
}

/// A deferred that fires once its children have.
///
/// Dereferences to the aggregate [`Deferred`], so handlers are added to the
/// list directly.
pub struct DeferredList<T: 'static> {
    state: Rc<ListState<T>>,
}

impl<T: Clone + 'static> DeferredList<T> {
    /// Watches `children` with the given early-exit flags.
    #[must_use]
    pub fn new(
        children: Vec<Deferred<T>>,
        fire_on_one_callback: bool,
        fire_on_one_errback: bool,
    ) -> Self {
        Self::builder(children)
            .fire_on_one_callback(fire_on_one_callback)
            .fire_on_one_errback(fire_on_one_errback)
            .build()
    }

    /// Starts a builder with every option off.
    #[must_use]
    pub fn builder(children: Vec<Deferred<T>>) -> DeferredListBuilder<T> {
        DeferredListBuilder {
            children,
            fire_on_one_callback: false,
            fire_on_one_errback: false,
            consume: None,
        }
    }

    fn attach(builder: DeferredListBuilder<T>) -> Self {
        let count = builder.children.len();
        let state = Rc::new(ListState {
            slots: RefCell::new(vec![None; count]),
            finished: Cell::new(0),
            fire_on_one_callback: builder.fire_on_one_callback,
            fire_on_one_errback: builder.fire_on_one_errback,
            consume: builder.consume,
            aggregate: Deferred::new(),
        });

        // With no children there is nothing to wait for, whatever the flags say.
        if count == 0 {
            let _ = state.aggregate.callback(ListOutcome::All(Vec::new()));
        }

        for (index, child) in builder.children.into_iter().enumerate() {
            let watcher = Rc::clone(&state);
            child.add_both(move |outcome| {
                watcher.record(index, outcome.clone());
                match outcome {
                    Ok(value) => Step::Value(value),
                    Err(error) => match &watcher.consume {
                        Some(default) => Step::Value(default()),
                        None => Step::Fail(error),
                    },
                }
            });
        }

        Self { state }
    }

    /// Number of children that have finished so far.
    #[must_use]
    pub fn finished_count(&self) -> usize {
        self.state.finished.get()
    }

    /// Returns a handle to the aggregate deferred.
    #[must_use]
    pub fn into_deferred(self) -> Deferred<ListOutcome<T>> {
        self.state.aggregate.clone()
    }
}

impl<T: 'static> Deref for DeferredList<T> {
    type Target = Deferred<ListOutcome<T>>;

    fn deref(&self) -> &Self::Target {
        &self.state.aggregate
    }
}

impl<T: 'static> fmt::Debug for DeferredList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredList")
            .field("finished", &self.state.finished.get())
            .field("aggregate", &self.state.aggregate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("child failed")]
    struct ChildFailed;

    fn outcome_of<T: Clone + 'static>(list: &DeferredList<T>) -> Option<Result<ListOutcome<T>, Failure>> {
        list.peek_value()
    }

    #[test]
    fn empty_list_fires_immediately() {
        init_test("empty_list_fires_immediately");
        let list: DeferredList<i32> = DeferredList::new(Vec::new(), false, false);
        let got = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&got);
        list.add_callback(move |outcome| {
            if let ListOutcome::All(entries) = &outcome {
                *slot.borrow_mut() = Some(entries.len());
            }
            Step::Value(outcome)
        });
        let got = *got.borrow();
        crate::assert_with_log!(got == Some(0), "called with []", Some(0), got);
        crate::test_complete!("empty_list_fires_immediately");
    }

    #[test]
    fn empty_list_with_fire_on_one_callback_still_fires_all() {
        init_test("empty_list_with_fire_on_one_callback_still_fires_all");
        let list: DeferredList<i32> = DeferredList::new(Vec::new(), true, true);
        let all = matches!(outcome_of(&list), Some(Ok(ListOutcome::All(ref e))) if e.is_empty());
        crate::assert_with_log!(all, "All([])", true, all);
        crate::test_complete!("empty_list_with_fire_on_one_callback_still_fires_all");
    }

    #[test]
    fn results_stored_by_child_index() {
        init_test("results_stored_by_child_index");
        let children: Vec<Deferred<i32>> = (0..3).map(|_| Deferred::new()).collect();
        let list = DeferredList::new(children.clone(), false, false);
        children[2].callback(30).unwrap();
        children[0].callback(10).unwrap();
        crate::assert_with_log!(!list.is_fired(), "waits for all", false, list.is_fired());
        children[1].errback(ChildFailed).unwrap();
        children[1].add_errback(|_| Step::Value(0));

        let Some(Ok(ListOutcome::All(entries))) = outcome_of(&list) else {
            panic!("expected All outcome");
        };
        let shape: Vec<(usize, bool)> = entries.iter().map(|e| (e.index, e.success())).collect();
        crate::assert_with_log!(
            shape == vec![(0, true), (1, false), (2, true)],
            "index order",
            vec![(0, true), (1, false), (2, true)],
            shape
        );
        crate::assert_with_log!(
            matches!(entries[2].outcome, Ok(30)),
            "value at own index",
            30,
            &entries[2].outcome
        );
        crate::test_complete!("results_stored_by_child_index");
    }

    #[test]
    fn fire_on_one_errback_reports_first_error() {
        init_test("fire_on_one_errback_reports_first_error");
        let children: Vec<Deferred<i32>> = (0..3).map(|_| Deferred::new()).collect();
        let list = DeferredList::new(children.clone(), false, true);
        children[1].errback(ChildFailed).unwrap();
        children[1].add_errback(|_| Step::Value(0));

        crate::assert_with_log!(list.is_fired(), "fired early", true, list.is_fired());
        let Some(Err(failure)) = outcome_of(&list) else {
            panic!("expected failure");
        };
        let first = failure.check::<FirstError>().cloned();
        let index = first.as_ref().map(|f| f.index);
        crate::assert_with_log!(index == Some(1), "index", Some(1), index);
        let inner_ok = first.is_some_and(|f| f.error.is::<ChildFailed>());
        crate::assert_with_log!(inner_ok, "wrapped child error", true, inner_ok);
        list.add_errback(|_| Step::Value(ListOutcome::All(Vec::new())));

        // Stragglers are still recorded but cannot refire the list.
        children[0].callback(1).unwrap();
        children[2].callback(3).unwrap();
        crate::assert_with_log!(list.finished_count() == 3, "finished", 3, list.finished_count());
        crate::test_complete!("fire_on_one_errback_reports_first_error");
    }

    #[test]
    fn fire_on_one_callback_reports_winner() {
        init_test("fire_on_one_callback_reports_winner");
        let children: Vec<Deferred<&'static str>> = (0..2).map(|_| Deferred::new()).collect();
        let list = DeferredList::new(children.clone(), true, false);
        children[1].callback("b").unwrap();
        let winner = match outcome_of(&list) {
            Some(Ok(ListOutcome::First { value, index })) => Some((value, index)),
            _ => None,
        };
        crate::assert_with_log!(winner == Some(("b", 1)), "winner", Some(("b", 1)), winner);
        children[0].callback("a").unwrap();
        crate::test_complete!("fire_on_one_callback_reports_winner");
    }

    #[test]
    fn consume_errors_swallows_child_failures() {
        init_test("consume_errors_swallows_child_failures");
        let _ = crate::defer::take_unhandled_failures();
        let child: Deferred<i32> = Deferred::new();
        let list = DeferredList::builder(vec![child.clone()])
            .consume_errors(true)
            .build();
        child.errback(ChildFailed).unwrap();
        crate::assert_fired_with!(child, 0);
        drop(child);
        let entry_failed = matches!(
            outcome_of(&list),
            Some(Ok(ListOutcome::All(ref e))) if !e[0].success()
        );
        crate::assert_with_log!(entry_failed, "entry records failure", true, entry_failed);
        drop(list);
        let leaked = crate::defer::take_unhandled_failures();
        crate::assert_with_log!(leaked.is_empty(), "nothing unhandled", 0, leaked.len());
        crate::test_complete!("consume_errors_swallows_child_failures");
    }

    #[test]
    fn consume_errors_with_uses_caller_replacement() {
        init_test("consume_errors_with_uses_caller_replacement");
        let _ = crate::defer::take_unhandled_failures();

        #[derive(Debug, Clone, PartialEq)]
        enum Reading {
            Celsius(i32),
            Missing,
        }

        let children: Vec<Deferred<Reading>> = (0..2).map(|_| Deferred::new()).collect();
        let list = DeferredList::builder(children.clone())
            .consume_errors_with(|| Reading::Missing)
            .build();
        children[0].callback(Reading::Celsius(21)).unwrap();
        children[1].errback(ChildFailed).unwrap();
        crate::assert_fired_with!(children[1], Reading::Missing);

        let failed = match outcome_of(&list) {
            Some(Ok(ListOutcome::All(entries))) => {
                entries.iter().map(|e| !e.success()).collect::<Vec<_>>()
            }
            _ => Vec::new(),
        };
        crate::assert_with_log!(
            failed == [false, true],
            "failure kept in entry",
            [false, true],
            failed
        );
        drop(children);
        drop(list);
        let leaked = crate::defer::take_unhandled_failures();
        crate::assert_with_log!(leaked.is_empty(), "nothing unhandled", 0, leaked.len());
        crate::test_complete!("consume_errors_with_uses_caller_replacement");
    }

    #[test]
    fn into_values_strips_wrapper() {
        init_test("into_values_strips_wrapper");
        let outcome = ListOutcome::All(vec![
            ListEntry { index: 0, outcome: Ok(1) },
            ListEntry { index: 1, outcome: Ok(2) },
        ]);
        let values = outcome.into_values().ok();
        crate::assert_with_log!(values == Some(vec![1, 2]), "values", Some(vec![1, 2]), values);
        crate::test_complete!("into_values_strips_wrapper");
    }
}
