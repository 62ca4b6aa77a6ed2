//! Result sinks that write as they go.

use super::result::{ResultSink, Summary, TestResult, format_summary, machine_summary};
use crate::defer::Failure;
use serde::Serialize;
use std::io::{self, Write};

/// Keeps the first write error; sinks cannot fail mid-run.
#[derive(Debug, Default)]
struct WriteState {
    error: Option<io::Error>,
}

impl WriteState {
    fn record(&mut self, result: io::Result<()>) {
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
    }

    fn take(&mut self) -> io::Result<()> {
        self.error.take().map_or(Ok(()), Err)
    }
}

/// Prints one line per test, then a summary.
///
/// ```text
/// Pair.test_error ... ERROR
///     Failure: plain error
/// Pair.test_ok ... OK
/// FAILED (tests=2, errors=1) in 0 ms
/// |*BEGIN-SUMMARY*| 2,0,1,0 |*END-SUMMARY*|
/// ```
#[derive(Debug)]
pub struct ConsoleReporter<W: Write> {
    out: W,
    result: TestResult,
    current: Vec<(&'static str, Option<String>)>,
    state: WriteState,
}

impl<W: Write> ConsoleReporter<W> {
    /// A reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            result: TestResult::new(),
            current: Vec::new(),
            state: WriteState::default(),
        }
    }

    /// Everything reported so far.
    #[must_use]
    pub fn result(&self) -> &TestResult {
        &self.result
    }

    /// Writes the summary lines.
    ///
    /// # Errors
    ///
    /// The first write error of the run, if any, or one from these lines.
    pub fn finish(&mut self, elapsed_ms: u64) -> io::Result<()> {
        self.state.take()?;
        writeln!(self.out, "{} in {elapsed_ms} ms", format_summary(&self.result))?;
        writeln!(self.out, "{}", machine_summary(&self.result.summary()))?;
        self.out.flush()
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_test(&mut self, id: &str) -> io::Result<()> {
        let labels: Vec<&str> = self.current.iter().map(|(label, _)| *label).collect();
        writeln!(self.out, "{id} ... {}", labels.join(", "))?;
        for detail in self.current.iter().filter_map(|(_, detail)| detail.as_ref()) {
            writeln!(self.out, "    {detail}")?;
        }
        Ok(())
    }
}

impl<W: Write> ResultSink for ConsoleReporter<W> {
    fn start_test(&mut self, id: &str) {
        self.current.clear();
        self.result.start_test(id);
    }

    fn stop_test(&mut self, id: &str) {
        let written = self.write_test(id);
        self.state.record(written);
        self.current.clear();
        self.result.stop_test(id);
    }

    fn add_success(&mut self, id: &str) {
        self.current.push(("OK", None));
        self.result.add_success(id);
    }

    fn add_failure(&mut self, id: &str, failure: &Failure) {
        self.current.push(("FAILURE", Some(failure.to_string())));
        self.result.add_failure(id, failure);
    }

    fn add_error(&mut self, id: &str, error: &Failure) {
        self.current.push(("ERROR", Some(error.to_string())));
        self.result.add_error(id, error);
    }

    fn add_skip(&mut self, id: &str, reason: &Failure) {
        self.current.push(("SKIP", Some(reason.to_string())));
        self.result.add_skip(id, reason);
    }
}

/// One line of a [`JsonReporter`] stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReportEvent<'a> {
    /// A test started.
    Start {
        /// Test id.
        test: &'a str,
    },
    /// A test passed.
    Success {
        /// Test id.
        test: &'a str,
    },
    /// An assertion failed.
    Failure {
        /// Test id.
        test: &'a str,
        /// The failure's message.
        message: String,
    },
    /// The test errored.
    Error {
        /// Test id.
        test: &'a str,
        /// The error's message.
        message: String,
    },
    /// The test skipped itself.
    Skip {
        /// Test id.
        test: &'a str,
        /// Why.
        message: String,
    },
    /// A test finished.
    Stop {
        /// Test id.
        test: &'a str,
    },
    /// End of the run.
    Summary {
        /// The counts.
        #[serde(flatten)]
        summary: Summary,
        /// Elapsed scheduler time.
        elapsed_ms: u64,
    },
}

/// Writes every lifecycle event as one JSON object per line.
#[derive(Debug)]
pub struct JsonReporter<W: Write> {
    out: W,
    result: TestResult,
    state: WriteState,
}

impl<W: Write> JsonReporter<W> {
    /// A reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            result: TestResult::new(),
            state: WriteState::default(),
        }
    }

    /// Everything reported so far.
    #[must_use]
    pub fn result(&self) -> &TestResult {
        &self.result
    }

    /// Writes the closing summary event.
    ///
    /// # Errors
    ///
    /// The first write error of the run, if any, or one from this event.
    pub fn finish(&mut self, elapsed_ms: u64) -> io::Result<()> {
        self.state.take()?;
        let summary = self.result.summary();
        self.write(&ReportEvent::Summary {
            summary,
            elapsed_ms,
        })?;
        self.out.flush()
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, event: &ReportEvent<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")
    }

    fn emit(&mut self, event: &ReportEvent<'_>) {
        let written = self.write(event);
        self.state.record(written);
    }
}

impl<W: Write> ResultSink for JsonReporter<W> {
    fn start_test(&mut self, id: &str) {
        self.result.start_test(id);
        self.emit(&ReportEvent::Start { test: id });
    }

    fn stop_test(&mut self, id: &str) {
        self.result.stop_test(id);
        self.emit(&ReportEvent::Stop { test: id });
    }

    fn add_success(&mut self, id: &str) {
        self.result.add_success(id);
        self.emit(&ReportEvent::Success { test: id });
    }

    fn add_failure(&mut self, id: &str, failure: &Failure) {
        self.result.add_failure(id, failure);
        self.emit(&ReportEvent::Failure {
            test: id,
            message: failure.error().to_string(),
        });
    }

    fn add_error(&mut self, id: &str, error: &Failure) {
        self.result.add_error(id, error);
        self.emit(&ReportEvent::Error {
            test: id,
            message: error.error().to_string(),
        });
    }

    fn add_skip(&mut self, id: &str, reason: &Failure) {
        self.result.add_skip(id, reason);
        self.emit(&ReportEvent::Skip {
            test: id,
            message: reason.error().to_string(),
        });
    }
}
