//! Collecting test outcomes.

use crate::defer::Failure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Receives the lifecycle of every test in a run.
///
/// A test gets exactly one `start_test` and one `stop_test`. In between it
/// gets either `add_success` or one or more of the other three (a failing
/// method can be followed by a tearDown error).
pub trait ResultSink {
    /// A test is about to run.
    fn start_test(&mut self, id: &str);
    /// A test is done; nothing more will be reported for it.
    fn stop_test(&mut self, id: &str);
    /// The test passed.
    fn add_success(&mut self, id: &str);
    /// An assertion did not hold.
    fn add_failure(&mut self, id: &str, failure: &Failure);
    /// Something other than an assertion went wrong.
    fn add_error(&mut self, id: &str, error: &Failure);
    /// The test skipped itself.
    fn add_skip(&mut self, id: &str, reason: &Failure);
}

/// Counts of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Tests started.
    pub run: usize,
    /// Tests that passed.
    pub success: usize,
    /// Recorded assertion failures.
    pub failures: usize,
    /// Recorded errors.
    pub errors: usize,
    /// Recorded skips.
    pub skips: usize,
}

impl Summary {
    /// True if nothing failed or errored. Skips do not count against a run.
    #[must_use]
    pub fn was_successful(&self) -> bool {
        self.failures == 0 && self.errors == 0
    }
}

/// `PASSED (tests=N)` or `FAILED (tests=N, errors=E, failures=F, skips=S)`,
/// leaving out zero counts.
impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.was_successful() { "PASSED" } else { "FAILED" };
        write!(f, "{verdict} (tests={}", self.run)?;
        for (label, count) in [
            ("errors", self.errors),
            ("failures", self.failures),
            ("skips", self.skips),
        ] {
            if count > 0 {
                write!(f, ", {label}={count}")?;
            }
        }
        f.write_str(")")
    }
}

/// In-memory [`ResultSink`] that keeps every outcome.
#[derive(Debug, Default)]
pub struct TestResult {
    tests_run: usize,
    successes: Vec<String>,
    failures: Vec<(String, Failure)>,
    errors: Vec<(String, Failure)>,
    skips: Vec<(String, Failure)>,
}

impl TestResult {
    /// Creates an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tests started.
    #[must_use]
    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    /// Ids of passing tests.
    #[must_use]
    pub fn successes(&self) -> &[String] {
        &self.successes
    }

    /// `(id, failure)` for every failed assertion.
    #[must_use]
    pub fn failures(&self) -> &[(String, Failure)] {
        &self.failures
    }

    /// `(id, error)` for every error.
    #[must_use]
    pub fn errors(&self) -> &[(String, Failure)] {
        &self.errors
    }

    /// `(id, reason)` for every skip.
    #[must_use]
    pub fn skips(&self) -> &[(String, Failure)] {
        &self.skips
    }

    /// True if there were no failures and no errors.
    #[must_use]
    pub fn was_successful(&self) -> bool {
        self.summary().was_successful()
    }

    /// The counts.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            run: self.tests_run,
            success: self.successes.len(),
            failures: self.failures.len(),
            errors: self.errors.len(),
            skips: self.skips.len(),
        }
    }
}

impl ResultSink for TestResult {
    fn start_test(&mut self, _id: &str) {
        self.tests_run += 1;
    }

    fn stop_test(&mut self, _id: &str) {}

    fn add_success(&mut self, id: &str) {
        self.successes.push(id.to_owned());
    }

    fn add_failure(&mut self, id: &str, failure: &Failure) {
        self.failures.push((id.to_owned(), failure.clone()));
    }

    fn add_error(&mut self, id: &str, error: &Failure) {
        self.errors.push((id.to_owned(), error.clone()));
    }

    fn add_skip(&mut self, id: &str, reason: &Failure) {
        self.skips.push((id.to_owned(), reason.clone()));
    }
}

/// Human summary line for `result`.
#[must_use]
pub fn format_summary(result: &TestResult) -> String {
    result.summary().to_string()
}

/// The machine-readable line: `|*BEGIN-SUMMARY*| run,failures,errors,skips |*END-SUMMARY*|`.
#[must_use]
pub fn machine_summary(summary: &Summary) -> String {
    format!(
        "|*BEGIN-SUMMARY*| {},{},{},{} |*END-SUMMARY*|",
        summary.run, summary.failures, summary.errors, summary.skips
    )
}
