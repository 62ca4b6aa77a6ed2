//! Trees of tests.

use super::case::{Fixture, FixtureCase, TestCase, is_runnable_fixture_name};
use super::visitor::{CaseVisitor, SerialVisitor, SynchronousVisitor};
use crate::defer::Deferred;
use crate::tracing_compat::debug;
use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to a test case.
pub type CaseRef = Rc<RefCell<dyn TestCase>>;

/// A node of a test tree.
#[derive(Clone)]
pub enum Test {
    /// A single case.
    Case(CaseRef),
    /// A named group of tests.
    Suite(TestSuite),
}

impl Test {
    /// Wraps a case.
    pub fn case(case: impl TestCase + 'static) -> Self {
        Self::Case(Rc::new(RefCell::new(case)))
    }

    /// Number of cases in this tree.
    #[must_use]
    pub fn count_test_cases(&self) -> usize {
        let mut total = 0;
        SynchronousVisitor.traverse(std::slice::from_ref(self), &mut |_: &CaseRef| total += 1);
        total
    }
}

impl From<TestSuite> for Test {
    fn from(suite: TestSuite) -> Self {
        Self::Suite(suite)
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Case(case) => match case.try_borrow() {
                Ok(case) => write!(f, "Case({})", case.id()),
                Err(_) => f.write_str("Case(<running>)"),
            },
            Self::Suite(suite) => suite.fmt(f),
        }
    }
}

/// An ordered, named list of tests. Children run in the order they were added.
#[derive(Clone, Default)]
pub struct TestSuite {
    name: String,
    tests: Vec<Test>,
}

impl TestSuite {
    /// Creates an empty suite.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    /// Loads every `test_` method of `F`, sorted by name, one case each.
    ///
    /// A fixture whose name starts with `_` yields an empty suite.
    #[must_use]
    pub fn from_fixture<F: Fixture>() -> Self {
        let mut suite = Self::new(F::NAME);
        if !is_runnable_fixture_name(F::NAME) {
            debug!(fixture = F::NAME, "skipping helper fixture");
            return suite;
        }
        let mut methods: Vec<_> = F::tests()
            .into_iter()
            .filter(|(name, _)| name.starts_with("test_"))
            .collect();
        methods.sort_by_key(|(name, _)| *name);
        for (name, method) in methods {
            suite.add_test(Test::case(FixtureCase::<F>::new(name, method)));
        }
        suite
    }

    /// The suite's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `test`.
    pub fn add_test(&mut self, test: impl Into<Test>) {
        self.tests.push(test.into());
    }

    /// Appends every test in `tests`.
    pub fn add_tests<I>(&mut self, tests: I)
    where
        I: IntoIterator,
        I::Item: Into<Test>,
    {
        self.tests.extend(tests.into_iter().map(Into::into));
    }

    /// Direct children.
    #[must_use]
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// Number of cases, counting nested suites.
    #[must_use]
    pub fn count_test_cases(&self) -> usize {
        let mut total = 0;
        SynchronousVisitor.traverse(&self.tests, &mut |_: &CaseRef| total += 1);
        total
    }

    /// Runs `visitor` on every case in order through `serial`, starting each
    /// case once the previous one's deferred has fired.
    pub fn visit(&self, serial: &SerialVisitor, visitor: &CaseVisitor) -> Deferred<()> {
        serial.traverse(&self.tests, visitor)
    }

    /// Calls `visitor` on every case in order, without waiting on anything.
    pub fn visit_sync(&self, visitor: &mut dyn FnMut(&CaseRef)) {
        SynchronousVisitor.traverse(&self.tests, visitor);
    }
}

impl fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("name", &self.name)
            .field("tests", &self.tests)
            .finish()
    }
}
