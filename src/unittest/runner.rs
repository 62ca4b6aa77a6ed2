//! Running tests.
//!
//! Each case goes through setUp, its method and tearDown, each wrapped with
//! [`Deferred::maybe_call`] so a step may return a value, fail, panic, or hand
//! back a deferred to wait on. Outcomes are classified as they happen:
//!
//! | step     | `AssertionError` | `SkipTest` | anything else |
//! |----------|------------------|------------|---------------|
//! | setUp    | error            | skip       | error         |
//! | method   | failure          | skip       | error         |
//! | tearDown | error            | error      | error         |
//!
//! A failed setUp skips the method and tearDown. tearDown runs after any
//! method outcome. Once tearDown is done the test's pending-call registry is
//! checked and emptied; leftovers turn a test that would have passed into an
//! error but never add to a test that already reported something. A timer the
//! test scheduled that panicked while it ran is reported as an error of that
//! test before the leak check.

use super::case::{TestCase, TestStep, settle};
use super::context::{AssertionError, SkipTest, TestContext};
use super::pending::{PendingCalls, TrackingScheduler};
use super::report::ConsoleReporter;
use super::result::{ResultSink, Summary};
use super::suite::{CaseRef, Test};
use super::visitor::{CaseVisitor, SerialVisitor};
use crate::config::HarnessConfig;
use crate::defer::{Deferred, Failure, Step};
use crate::error::HarnessError;
use crate::time::Scheduler;
use crate::tracing_compat::{debug, info, warn};
use core::fmt;
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;

/// Shared handle to a result sink.
pub type SinkRef = Rc<RefCell<dyn ResultSink>>;

/// Drives tests on a scheduler and reports to a [`ResultSink`].
#[derive(Clone)]
pub struct Runner {
    scheduler: Rc<dyn Scheduler>,
    config: HarnessConfig,
}

impl Runner {
    /// A runner scheduling through `scheduler`.
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>, config: HarnessConfig) -> Self {
        Self { scheduler, config }
    }

    /// The scheduler tests run on.
    #[must_use]
    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Starts `test` and returns a deferred that fires once every case in it
    /// has been reported to `sink`.
    ///
    /// Nothing happens past the first scheduler yield unless the scheduler is
    /// pumped; see [`run_to_completion`](Self::run_to_completion).
    pub fn run(&self, test: &Test, sink: &SinkRef) -> Deferred<()> {
        self.start(test, sink, &Rc::new(Cell::new(0)))
    }

    /// Like [`run`](Self::run), bumping `progress` whenever a test starts or
    /// finishes.
    fn start(&self, test: &Test, sink: &SinkRef, progress: &Rc<Cell<u64>>) -> Deferred<()> {
        let scheduler = Rc::clone(&self.scheduler);
        let detect_leaks = self.config.detect_leaks;
        let sink = Rc::clone(sink);
        let progress = Rc::clone(progress);
        let visitor: CaseVisitor = Rc::new(move |case: &CaseRef| {
            run_case(&scheduler, detect_leaks, case, &sink, &progress)
        });
        let visited = SerialVisitor::new(Rc::clone(&self.scheduler), self.config.yield_every)
            .visit(test, &visitor);

        // A step deferred counts as fired while it waits on a later step, so
        // completion is signalled from the end of its chain instead.
        let done = Deferred::new();
        let fire = done.clone();
        visited.add_both(move |outcome| {
            let _ = match outcome {
                Ok(()) => fire.callback(()),
                Err(failure) => fire.errback(failure),
            };
            Step::Value(())
        });
        done
    }

    /// Runs `test` and pumps the scheduler until it is done.
    ///
    /// # Errors
    ///
    /// [`HarnessError::Stalled`] if the run is not done and no test has
    /// started or finished for `stall_limit` scheduler rounds in a row, or
    /// [`HarnessError::Clock`] if the scheduler refused to turn.
    pub fn run_to_completion(&self, test: &Test, sink: &SinkRef) -> Result<(), HarnessError> {
        let progress = Rc::new(Cell::new(0));
        let done = self.start(test, sink, &progress);
        let mut seen = progress.get();
        let mut stalled = 0;
        while !done.is_fired() {
            if self.scheduler.turn()? == 0 {
                self.scheduler.park();
            }
            if done.is_fired() {
                break;
            }
            if progress.get() == seen {
                stalled += 1;
                if stalled >= self.config.stall_limit {
                    warn!(rounds = stalled, pending = self.scheduler.pending(), "run stalled");
                    return Err(HarnessError::Stalled { rounds: stalled });
                }
            } else {
                seen = progress.get();
                stalled = 0;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("pending", &self.scheduler.pending())
            .finish_non_exhaustive()
    }
}

/// Runs `test` to completion, printing per-test lines, the summary with the
/// elapsed scheduler time, and the machine summary line to `writer`.
///
/// # Errors
///
/// Invalid `config`, a stalled run, or a failed write.
pub fn run_console<W: Write + 'static>(
    test: &Test,
    scheduler: Rc<dyn Scheduler>,
    config: HarnessConfig,
    writer: W,
) -> Result<Summary, HarnessError> {
    config.validate()?;
    let started = scheduler.now();
    let reporter = Rc::new(RefCell::new(ConsoleReporter::new(writer)));
    let sink: SinkRef = reporter.clone();
    let runner = Runner::new(Rc::clone(&scheduler), config);
    runner.run_to_completion(test, &sink)?;
    let elapsed = scheduler.now().duration_since(started);
    let mut reporter = reporter.borrow_mut();
    reporter.finish(elapsed)?;
    Ok(reporter.result().summary())
}

struct CaseRun {
    id: String,
    case: CaseRef,
    sink: SinkRef,
    cx: TestContext,
    pending: Rc<PendingCalls>,
    success: Cell<bool>,
    detect_leaks: bool,
    progress: Rc<Cell<u64>>,
}

fn run_case(
    scheduler: &Rc<dyn Scheduler>,
    detect_leaks: bool,
    case: &CaseRef,
    sink: &SinkRef,
    progress: &Rc<Cell<u64>>,
) -> Deferred<()> {
    let id = case.borrow().id();
    info!(test = %id, "starting test");
    let pending = Rc::new(PendingCalls::new());
    let tracking = TrackingScheduler::new(Rc::clone(scheduler), Rc::clone(&pending));
    let run = Rc::new(CaseRun {
        cx: TestContext::new(id.clone(), tracking),
        id,
        case: Rc::clone(case),
        sink: Rc::clone(sink),
        pending,
        success: Cell::new(true),
        detect_leaks,
        progress: Rc::clone(progress),
    });
    run.sink.borrow_mut().start_test(&run.id);
    run.bump();

    let set_up = run.call(|case, cx| case.set_up(cx));
    let (proceed, failed) = (Rc::clone(&run), run);
    set_up.add_callbacks(
        move |()| Step::Wait(proceed.run_method()),
        move |failure| {
            failed.set_up_failed(&failure);
            Step::Value(())
        },
    );
    set_up
}

impl CaseRun {
    fn call(
        self: &Rc<Self>,
        step: impl FnOnce(&mut dyn TestCase, &TestContext) -> TestStep + 'static,
    ) -> Deferred<()> {
        let run = Rc::clone(self);
        Deferred::maybe_call(move || {
            let mut case = run.case.borrow_mut();
            settle(step(&mut *case, &run.cx))
        })
    }

    fn set_up_failed(&self, failure: &Failure) {
        self.success.set(false);
        if failure.is::<SkipTest>() {
            info!(test = %self.id, reason = %failure, "skipped in setUp");
            self.sink.borrow_mut().add_skip(&self.id, failure);
        } else {
            warn!(test = %self.id, error = %failure, "setUp failed");
            self.sink.borrow_mut().add_error(&self.id, failure);
        }
        self.finish();
    }

    fn run_method(self: Rc<Self>) -> Deferred<()> {
        let method = self.call(|case, cx| case.run_method(cx));
        let classify = Rc::clone(&self);
        method.add_errback(move |failure| {
            classify.method_failed(&failure);
            Step::Value(())
        });
        method.add_both(move |_| Step::Wait(self.tear_down()));
        method
    }

    fn method_failed(&self, failure: &Failure) {
        self.success.set(false);
        let mut sink = self.sink.borrow_mut();
        if failure.is::<AssertionError>() {
            warn!(test = %self.id, failure = %failure, "assertion failed");
            sink.add_failure(&self.id, failure);
        } else if failure.is::<SkipTest>() {
            info!(test = %self.id, reason = %failure, "skipped");
            sink.add_skip(&self.id, failure);
        } else {
            warn!(test = %self.id, error = %failure, "test errored");
            sink.add_error(&self.id, failure);
        }
    }

    fn tear_down(self: Rc<Self>) -> Deferred<()> {
        let tear_down = self.call(|case, cx| case.tear_down(cx));
        let errored = Rc::clone(&self);
        tear_down.add_errback(move |failure| {
            warn!(test = %errored.id, error = %failure, "tearDown failed");
            errored.success.set(false);
            errored.sink.borrow_mut().add_error(&errored.id, &failure);
            Step::Value(())
        });
        tear_down.add_both(move |_| {
            self.finish();
            Step::Value(())
        });
        tear_down
    }

    fn bump(&self) {
        self.progress.set(self.progress.get() + 1);
    }

    fn finish(&self) {
        for failure in self.pending.take_failures() {
            self.success.set(false);
            self.sink.borrow_mut().add_error(&self.id, &failure);
        }
        let leaked = self.pending.check_and_reset();
        if self.success.get() {
            match leaked {
                Err(leak) if self.detect_leaks => {
                    warn!(test = %self.id, error = %leak, "test leaked scheduled calls");
                    self.success.set(false);
                    self.sink.borrow_mut().add_error(&self.id, &Failure::new(leak));
                }
                _ => self.sink.borrow_mut().add_success(&self.id),
            }
        }
        debug!(test = %self.id, success = self.success.get(), "test finished");
        self.sink.borrow_mut().stop_test(&self.id);
        self.bump();
    }
}
