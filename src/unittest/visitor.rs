//! Walking a test tree.
//!
//! [`SerialVisitor`] runs the cases of a tree one after another, starting a
//! case only once the previous one's deferred has fired. When a case finishes
//! synchronously the next one starts from inside its completion handler, so
//! the native stack grows with every such case. The walk therefore hops
//! through the scheduler (a zero-delay timeout) every `yield_every` children
//! and at the end of every list, which keeps the depth bounded no matter how
//! large the suite is.
//!
//! [`SynchronousVisitor`] visits the same cases in the same order but never
//! waits; it is what counting uses.

use super::suite::{CaseRef, Test};
use crate::defer::{Deferred, Step, report_unhandled};
use crate::time::Scheduler;
use crate::tracing_compat::trace;
use std::rc::Rc;

/// Starts one case and returns a deferred that fires when it is done.
pub type CaseVisitor = Rc<dyn Fn(&CaseRef) -> Deferred<()>>;

/// Runs cases strictly in order, yielding through a scheduler.
#[derive(Clone)]
pub struct SerialVisitor {
    scheduler: Rc<dyn Scheduler>,
    yield_every: usize,
}

impl SerialVisitor {
    /// A visitor that hops through `scheduler` after every `yield_every`
    /// children (at least 1).
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>, yield_every: usize) -> Self {
        Self {
            scheduler,
            yield_every: yield_every.max(1),
        }
    }

    /// Visits every case under `tests` in order. The returned deferred fires
    /// after the last case is done.
    ///
    /// A case whose deferred fails is reported as unhandled and the walk
    /// continues with the next one.
    pub fn traverse(&self, tests: &[Test], visitor: &CaseVisitor) -> Deferred<()> {
        let done = Deferred::new();
        let walk = Rc::new(Walk {
            serial: self.clone(),
            tests: tests.to_vec(),
            visitor: Rc::clone(visitor),
            done: done.clone(),
        });
        walk.step(0);
        done
    }

    /// Visits one node: a case directly, a suite by walking its children.
    pub fn visit(&self, test: &Test, visitor: &CaseVisitor) -> Deferred<()> {
        match test {
            Test::Case(case) => visitor(case),
            Test::Suite(suite) => self.traverse(suite.tests(), visitor),
        }
    }

    fn hop(&self, next: impl FnOnce() + 'static) {
        let mut next = Some(next);
        self.scheduler.set_timeout(
            Box::new(move || {
                if let Some(next) = next.take() {
                    next();
                }
            }),
            0,
        );
    }
}

struct Walk {
    serial: SerialVisitor,
    tests: Vec<Test>,
    visitor: CaseVisitor,
    done: Deferred<()>,
}

impl Walk {
    fn step(self: Rc<Self>, index: usize) {
        let Some(test) = self.tests.get(index) else {
            let walk = Rc::clone(&self);
            self.serial.hop(move || {
                let _ = walk.done.callback(());
            });
            return;
        };
        let child = self.serial.visit(test, &self.visitor);
        let walk = Rc::clone(&self);
        child.add_both(move |outcome| {
            if let Err(failure) = outcome {
                report_unhandled(failure);
            }
            let next = index + 1;
            if next % walk.serial.yield_every == 0 {
                trace!(next, "serial visitor yielding");
                let resumed = Rc::clone(&walk);
                walk.serial.hop(move || resumed.step(next));
            } else {
                walk.step(next);
            }
            Step::Value(())
        });
    }
}

/// Visits every case in order right away, ignoring deferreds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynchronousVisitor;

impl SynchronousVisitor {
    /// Calls `visitor` on every case under `tests`, depth first.
    pub fn traverse(self, tests: &[Test], visitor: &mut dyn FnMut(&CaseRef)) {
        for test in tests {
            match test {
                Test::Case(case) => visitor(case),
                Test::Suite(suite) => self.traverse(suite.tests(), visitor),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::VirtualClock;
    use crate::unittest::case::{FnCase, done};
    use crate::unittest::suite::TestSuite;
    use std::cell::RefCell;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn suite_of(n: usize) -> TestSuite {
        let mut suite = TestSuite::new("flat");
        for i in 0..n {
            suite.add_test(Test::case(FnCase::new(format!("case{i}"), |_| done())));
        }
        suite
    }

    fn recording_visitor(order: &Rc<RefCell<Vec<String>>>) -> CaseVisitor {
        let order = Rc::clone(order);
        Rc::new(move |case: &CaseRef| {
            order.borrow_mut().push(case.borrow().id());
            Deferred::succeed(())
        })
    }

    #[test]
    fn serial_visits_in_order_and_yields_at_end() {
        init_test("serial_visits_in_order_and_yields_at_end");
        let clock = VirtualClock::new();
        let serial = SerialVisitor::new(Rc::new(clock.clone()), 64);
        let order = Rc::new(RefCell::new(Vec::new()));
        let done = serial.traverse(suite_of(3).tests(), &recording_visitor(&order));

        crate::assert_with_log!(order.borrow().len() == 3, "all ran", 3, order.borrow().len());
        crate::assert_with_log!(!done.is_fired(), "end-of-list hop pending", false, done.is_fired());
        clock.advance(0).unwrap();
        crate::assert_with_log!(done.is_fired(), "done", true, done.is_fired());
        assert_eq!(*order.borrow(), vec!["case0", "case1", "case2"]);
        crate::test_complete!("serial_visits_in_order_and_yields_at_end");
    }

    #[test]
    fn serial_waits_for_each_case() {
        init_test("serial_waits_for_each_case");
        let clock = VirtualClock::new();
        let serial = SerialVisitor::new(Rc::new(clock.clone()), 64);
        let gates: Rc<RefCell<Vec<Deferred<()>>>> = Rc::default();
        let g = Rc::clone(&gates);
        let visitor: CaseVisitor = Rc::new(move |_case: &CaseRef| {
            let gate = Deferred::new();
            g.borrow_mut().push(gate.clone());
            gate
        });
        let done = serial.traverse(suite_of(2).tests(), &visitor);
        crate::assert_with_log!(gates.borrow().len() == 1, "second not started", 1, gates.borrow().len());
        let first = gates.borrow()[0].clone();
        first.callback(()).unwrap();
        crate::assert_with_log!(gates.borrow().len() == 2, "second started", 2, gates.borrow().len());
        let second = gates.borrow()[1].clone();
        second.callback(()).unwrap();
        clock.advance(0).unwrap();
        crate::assert_with_log!(done.is_fired(), "done", true, done.is_fired());
        crate::test_complete!("serial_waits_for_each_case");
    }

    #[test]
    fn serial_hops_every_yield_every_children() {
        init_test("serial_hops_every_yield_every_children");
        let clock = VirtualClock::new();
        let serial = SerialVisitor::new(Rc::new(clock.clone()), 2);
        let order = Rc::new(RefCell::new(Vec::new()));
        let done = serial.traverse(suite_of(5).tests(), &recording_visitor(&order));

        crate::assert_with_log!(order.borrow().len() == 2, "first batch", 2, order.borrow().len());
        clock.advance(0).unwrap();
        crate::assert_with_log!(order.borrow().len() == 4, "second batch", 4, order.borrow().len());
        clock.advance(0).unwrap();
        crate::assert_with_log!(order.borrow().len() == 5, "last", 5, order.borrow().len());
        clock.advance(0).unwrap();
        crate::assert_with_log!(done.is_fired(), "done", true, done.is_fired());
        crate::test_complete!("serial_hops_every_yield_every_children");
    }

    #[test]
    fn large_synchronous_suite_keeps_stack_bounded() {
        init_test("large_synchronous_suite_keeps_stack_bounded");
        let clock = VirtualClock::new();
        let serial = SerialVisitor::new(Rc::new(clock.clone()), 16);
        let order = Rc::new(RefCell::new(Vec::new()));
        let done = serial.traverse(suite_of(20_000).tests(), &recording_visitor(&order));
        let mut rounds = 0;
        while !done.is_fired() {
            clock.advance(0).unwrap();
            rounds += 1;
        }
        crate::assert_with_log!(order.borrow().len() == 20_000, "all ran", 20_000, order.borrow().len());
        crate::assert_with_log!(rounds == 1251, "one hop per batch plus the end", 1251, rounds);
        crate::test_complete!("large_synchronous_suite_keeps_stack_bounded");
    }

    #[test]
    fn nested_suites_visit_depth_first() {
        init_test("nested_suites_visit_depth_first");
        let clock = VirtualClock::new();
        let serial = SerialVisitor::new(Rc::new(clock.clone()), 64);
        let mut outer = TestSuite::new("outer");
        outer.add_test(suite_of(2));
        outer.add_test(Test::case(FnCase::new("last", |_| done())));
        let order = Rc::new(RefCell::new(Vec::new()));
        let done = serial.visit(&Test::from(outer.clone()), &recording_visitor(&order));
        while !done.is_fired() {
            clock.advance(0).unwrap();
        }
        assert_eq!(*order.borrow(), vec!["case0", "case1", "last"]);

        let mut seen = Vec::new();
        SynchronousVisitor.traverse(outer.tests(), &mut |case: &CaseRef| seen.push(case.borrow().id()));
        assert_eq!(seen, *order.borrow());
        crate::test_complete!("nested_suites_visit_depth_first");
    }
}
