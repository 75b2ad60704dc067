// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregated test results for a single run.
//!
//! Results are produced by the orchestrator once a run completes. They are
//! organized as suites containing cases, and every test object (suite or case)
//! carries a [`TestId`] that is stable across runs.

use crate::history::RunId;
use iddqd::{IdOrdItem, IdOrdMap, id_upcast};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// The stable identifier of a test object.
///
/// The identifier is the only join key between runs: two results in different
/// runs refer to the same test if and only if their identifiers are equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TestId(SmolStr);

impl TestId {
    /// Creates a new `TestId`.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Creates the identifier of a test case within a suite.
    ///
    /// This is of the form `suite::case`.
    pub fn for_case(suite: &TestId, case_name: &str) -> Self {
        Self(smol_str::format_smolstr!("{}::{}", suite.0, case_name))
    }

    /// Returns the identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outcome of a single test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test was skipped.
    Skipped,
}

/// The result of a test case within a run.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestCaseResult {
    /// The test's stable identifier.
    pub id: TestId,

    /// The display name of the test case.
    pub name: SmolStr,

    /// The outcome of the test case.
    pub status: TestStatus,

    /// The run containing this test's result in the immediately preceding
    /// completed run, if the orchestrator linked one.
    ///
    /// This is a shortcut computed when results are recorded. If it is absent,
    /// the test must be looked up by walking the run history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_run: Option<RunId>,
}

impl TestCaseResult {
    /// Creates a new, unlinked test case result.
    pub fn new(id: TestId, name: impl Into<SmolStr>, status: TestStatus) -> Self {
        Self {
            id,
            name: name.into(),
            status,
            previous_run: None,
        }
    }

    /// Returns the run holding this test's result in the immediately preceding
    /// completed run, if known.
    pub fn previous_run(&self) -> Option<RunId> {
        self.previous_run
    }
}

impl IdOrdItem for TestCaseResult {
    type Key<'a> = &'a TestId;
    fn key(&self) -> Self::Key<'_> {
        &self.id
    }
    id_upcast!();
}

/// The result of a test suite: a named container of test cases.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestSuiteResult {
    /// The suite's stable identifier.
    pub id: TestId,

    /// The test cases in this suite.
    pub cases: IdOrdMap<TestCaseResult>,
}

impl TestSuiteResult {
    /// Creates a new, empty suite.
    pub fn new(id: TestId) -> Self {
        Self {
            id,
            cases: IdOrdMap::new(),
        }
    }

    /// Adds a case to this suite, replacing any case with the same identifier.
    pub fn push_case(&mut self, case: TestCaseResult) -> &mut Self {
        self.cases.insert_overwrite(case);
        self
    }
}

impl IdOrdItem for TestSuiteResult {
    type Key<'a> = &'a TestId;
    fn key(&self) -> Self::Key<'_> {
        &self.id
    }
    id_upcast!();
}

/// A test object that quarantine state can be queried for.
#[derive(Clone, Copy, Debug)]
pub enum TestObject<'a> {
    /// A test suite. Suites never carry quarantine state of their own.
    Suite(&'a TestSuiteResult),

    /// A test case.
    Case(&'a TestCaseResult),
}

impl<'a> TestObject<'a> {
    /// Returns the identifier of this test object.
    pub fn id(&self) -> &'a TestId {
        match *self {
            TestObject::Suite(suite) => &suite.id,
            TestObject::Case(case) => &case.id,
        }
    }

    /// Returns true if this object is a test case.
    pub fn is_case(&self) -> bool {
        matches!(self, TestObject::Case(_))
    }
}

/// All test results produced by a single run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunResults {
    /// The suites in this run.
    pub suites: IdOrdMap<TestSuiteResult>,
}

impl RunResults {
    /// Creates an empty set of results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a suite, replacing any suite with the same identifier.
    pub fn push_suite(&mut self, suite: TestSuiteResult) -> &mut Self {
        self.suites.insert_overwrite(suite);
        self
    }

    /// Returns an iterator over every test case in the run.
    pub fn cases(&self) -> impl Iterator<Item = &TestCaseResult> + '_ {
        self.suites.iter().flat_map(|suite| suite.cases.iter())
    }

    /// Returns the number of test cases in the run.
    pub fn case_count(&self) -> usize {
        self.suites.iter().map(|suite| suite.cases.len()).sum()
    }

    /// Finds the test case with the given identifier.
    pub fn find_case(&self, id: &TestId) -> Option<&TestCaseResult> {
        self.suites.iter().find_map(|suite| suite.cases.get(id))
    }

    /// Finds the test object (suite or case) with the given identifier.
    pub fn find_corresponding_result(&self, id: &TestId) -> Option<TestObject<'_>> {
        if let Some(suite) = self.suites.get(id) {
            return Some(TestObject::Suite(suite));
        }
        self.find_case(id).map(TestObject::Case)
    }

    /// Rebuilds these results, passing every case through `f`.
    ///
    /// `f` must not change case identifiers.
    pub(crate) fn map_cases(self, mut f: impl FnMut(TestCaseResult) -> TestCaseResult) -> Self {
        let mut out = RunResults::new();
        for suite in self.suites {
            let mut new_suite = TestSuiteResult::new(suite.id);
            for case in suite.cases {
                new_suite.push_case(f(case));
            }
            out.push_suite(new_suite);
        }
        out
    }
}
