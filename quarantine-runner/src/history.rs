// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run history index.
//!
//! A pipeline's history is an append-only sequence of runs ordered by
//! completion. The propagation engine only ever reads it through the
//! [`RunHistory`] trait, walking from a run to its nearest preceding completed
//! run until the history is exhausted.

use crate::{
    errors::{
        DuplicateRunError, InvalidRunIdSelector, PropagateError, RunIdResolutionError, SaveError,
    },
    quarantine::{
        OwningRun, PropagationOptions, QuarantineData, QuarantinePersistence, QuarantineView,
        compute_quarantine_data,
    },
    results::RunResults,
};
use chrono::{DateTime, Utc};
use debug_ignore::DebugIgnore;
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

/// The kind tag for [`RunId`].
pub enum RunKind {}

impl TypedUuidKind for RunKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("run");
        TAG
    }
}

/// The unique identifier of a run.
pub type RunId = TypedUuid<RunKind>;

/// Whether a run has completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// The run finished, successfully or not.
    Completed,

    /// The run is still in progress, or was interrupted before it finished.
    Incomplete,
}

impl RunStatus {
    /// Returns true if the run completed.
    pub fn is_completed(self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// Read access to a pipeline's run history.
///
/// Implementations must guarantee that following
/// [`previous_completed_run`](Self::previous_completed_run) from any run
/// eventually returns `None`.
pub trait RunHistory {
    /// Returns the nearest completed run strictly before `run`.
    fn previous_completed_run(&self, run: RunId) -> Option<RunId>;

    /// Returns the aggregated test results of `run`, if it has any.
    fn results_of(&self, run: RunId) -> Option<&RunResults>;

    /// Returns the quarantine data attached to `run`, if any.
    fn quarantine_of(&self, run: RunId) -> Option<&QuarantineData>;
}

impl<H: RunHistory + ?Sized> RunHistory for &H {
    fn previous_completed_run(&self, run: RunId) -> Option<RunId> {
        (**self).previous_completed_run(run)
    }

    fn results_of(&self, run: RunId) -> Option<&RunResults> {
        (**self).results_of(run)
    }

    fn quarantine_of(&self, run: RunId) -> Option<&QuarantineData> {
        (**self).quarantine_of(run)
    }
}

/// Summary information about a recorded run.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordedRunInfo {
    /// The run's identifier.
    pub run_id: RunId,

    /// Whether the run completed.
    pub status: RunStatus,

    /// When the run was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// A run in the history, along with the data attached to it.
#[derive(Clone, Debug)]
pub struct RecordedRun {
    info: RecordedRunInfo,
    results: Option<RunResults>,
    quarantine: Option<QuarantineData>,
}

impl RecordedRun {
    /// Returns summary information about this run.
    pub fn info(&self) -> &RecordedRunInfo {
        &self.info
    }

    /// Returns this run's identifier.
    pub fn run_id(&self) -> RunId {
        self.info.run_id
    }

    /// Returns this run's test results, if any were produced.
    pub fn results(&self) -> Option<&RunResults> {
        self.results.as_ref()
    }

    /// Returns the quarantine data attached to this run, if any.
    pub fn quarantine(&self) -> Option<&QuarantineData> {
        self.quarantine.as_ref()
    }
}

/// An in-memory index over a pipeline's run history.
///
/// Runs are stored oldest first. Since a run's predecessor is always stored
/// at a smaller position, walking backwards always terminates.
#[derive(Debug)]
pub struct RunHistoryIndex {
    runs: Vec<RecordedRun>,
    positions: HashMap<RunId, usize>,
    consumer_configured: bool,
    persistence: DebugIgnore<Box<dyn QuarantinePersistence>>,
}

impl RunHistoryIndex {
    /// Creates a new, empty index.
    ///
    /// `consumer_configured` is the policy gate: whether this pipeline has a
    /// quarantine-aware consumer configured. Saving quarantine data through
    /// this index is a no-op; use [`with_persistence`](Self::with_persistence)
    /// to write it somewhere durable.
    pub fn new(consumer_configured: bool) -> Self {
        Self::with_persistence(consumer_configured, Box::new(InMemoryPersistence))
    }

    /// Creates a new, empty index which saves quarantine data through
    /// `persistence`.
    pub fn with_persistence(
        consumer_configured: bool,
        persistence: Box<dyn QuarantinePersistence>,
    ) -> Self {
        Self {
            runs: Vec::new(),
            positions: HashMap::new(),
            consumer_configured,
            persistence: DebugIgnore(persistence),
        }
    }

    /// Returns true if this pipeline has a quarantine-aware consumer configured.
    pub fn is_quarantine_consumer_configured(&self) -> bool {
        self.consumer_configured
    }

    /// Appends an already-recorded run to the end of the history.
    ///
    /// The results are stored as-is; no previous-result links are computed.
    pub fn push_run(
        &mut self,
        info: RecordedRunInfo,
        results: Option<RunResults>,
        quarantine: Option<QuarantineData>,
    ) -> Result<(), DuplicateRunError> {
        let run_id = info.run_id;
        if self.positions.contains_key(&run_id) {
            return Err(DuplicateRunError { run_id });
        }
        self.positions.insert(run_id, self.runs.len());
        self.runs.push(RecordedRun {
            info,
            results,
            quarantine,
        });
        Ok(())
    }

    /// Records a new run at the end of the history, returning its identifier.
    ///
    /// Each test case in `results` is linked to the latest completed run if
    /// that run has a result with the same identifier.
    pub fn record_run(&mut self, status: RunStatus, results: Option<RunResults>) -> RunId {
        let run_id = RunId::new_v4();
        let results = results.map(|results| self.link_previous_results(results));
        let info = RecordedRunInfo {
            run_id,
            status,
            recorded_at: Utc::now(),
        };
        self.push_run(info, results, None)
            .expect("freshly generated run IDs are unique");
        run_id
    }

    /// Links each case in `results` to the latest completed run, if that run
    /// contains a result with the same identifier.
    pub fn link_previous_results(&self, results: RunResults) -> RunResults {
        let Some(previous) = self.latest_completed_run() else {
            return results;
        };
        let previous_results = self.results_of(previous);
        results.map_cases(|mut case| {
            case.previous_run = previous_results
                .and_then(|prev| prev.find_case(&case.id))
                .map(|_| previous);
            case
        })
    }

    /// Attaches quarantine data to its run, replacing any existing data.
    ///
    /// Returns the data back if its run is not in this history.
    pub fn attach_quarantine(&mut self, data: QuarantineData) -> Result<(), QuarantineData> {
        match self.positions.get(&data.run_id()) {
            Some(&pos) => {
                self.runs[pos].quarantine = Some(data);
                Ok(())
            }
            None => Err(data),
        }
    }

    /// Computes a run's quarantine data from its history and attaches it.
    ///
    /// A run without results gets empty quarantine data. A run that already
    /// has quarantine data attached is left unchanged and
    /// [`PropagateError::AlreadyPropagated`] is returned, so that explicit
    /// actions recorded on it are kept.
    pub fn propagate(
        &mut self,
        run_id: RunId,
        options: &PropagationOptions,
    ) -> Result<HistoryRun<'_>, PropagateError> {
        let &pos = self
            .positions
            .get(&run_id)
            .ok_or(PropagateError::RunNotFound { run_id })?;
        if self.runs[pos].quarantine.is_some() {
            return Err(PropagateError::AlreadyPropagated { run_id });
        }

        let empty = RunResults::new();
        let results = self.runs[pos].results.as_ref().unwrap_or(&empty);
        let data = compute_quarantine_data(run_id, &*self, results, options);
        self.runs[pos].quarantine = Some(data);

        let index = &*self;
        Ok(HistoryRun {
            index,
            run: &index.runs[pos],
        })
    }

    /// Returns the most recently completed run, if any.
    pub fn latest_completed_run(&self) -> Option<RunId> {
        self.runs
            .iter()
            .rev()
            .find(|run| run.info.status.is_completed())
            .map(RecordedRun::run_id)
    }

    /// Returns the number of runs in the history.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if the history has no runs.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Returns an iterator over runs, oldest first.
    pub fn runs(&self) -> impl DoubleEndedIterator<Item = &RecordedRun> + '_ {
        self.runs.iter()
    }

    /// Returns a handle to the given run.
    pub fn run(&self, run_id: RunId) -> Option<HistoryRun<'_>> {
        let &pos = self.positions.get(&run_id)?;
        Some(HistoryRun {
            index: self,
            run: &self.runs[pos],
        })
    }

    /// Resolves a run selector to a run in this history.
    pub fn resolve(&self, selector: &RunIdSelector) -> Result<RunId, RunIdResolutionError> {
        match selector {
            RunIdSelector::Latest => self
                .latest_completed_run()
                .ok_or(RunIdResolutionError::NoCompletedRuns),
            RunIdSelector::Prefix(prefix) => {
                let normalized = prefix.replace('-', "").to_lowercase();
                let candidates: Vec<RunId> = self
                    .runs
                    .iter()
                    .map(RecordedRun::run_id)
                    .filter(|run_id| {
                        run_id
                            .to_string()
                            .replace('-', "")
                            .starts_with(&normalized)
                    })
                    .collect();
                match candidates.as_slice() {
                    [] => Err(RunIdResolutionError::NotFound {
                        prefix: prefix.clone(),
                    }),
                    [run_id] => Ok(*run_id),
                    _ => Err(RunIdResolutionError::Ambiguous {
                        prefix: prefix.clone(),
                        candidates,
                    }),
                }
            }
        }
    }
}

impl RunHistory for RunHistoryIndex {
    fn previous_completed_run(&self, run: RunId) -> Option<RunId> {
        let &pos = self.positions.get(&run)?;
        self.runs[..pos]
            .iter()
            .rev()
            .find(|run| run.info.status.is_completed())
            .map(RecordedRun::run_id)
    }

    fn results_of(&self, run: RunId) -> Option<&RunResults> {
        let &pos = self.positions.get(&run)?;
        self.runs[pos].results.as_ref()
    }

    fn quarantine_of(&self, run: RunId) -> Option<&QuarantineData> {
        let &pos = self.positions.get(&run)?;
        self.runs[pos].quarantine.as_ref()
    }
}

/// A handle to a single run within a [`RunHistoryIndex`].
#[derive(Clone, Copy, Debug)]
pub struct HistoryRun<'a> {
    index: &'a RunHistoryIndex,
    run: &'a RecordedRun,
}

impl<'a> HistoryRun<'a> {
    /// Returns the run this handle refers to.
    pub fn recorded(&self) -> &'a RecordedRun {
        self.run
    }

    /// Returns a consumer view over this run's quarantine data, if any is
    /// attached.
    pub fn quarantine_view(self) -> Option<QuarantineView<'a, HistoryRun<'a>>> {
        self.run.quarantine.as_ref().map(|data| data.view(self))
    }
}

impl OwningRun for HistoryRun<'_> {
    fn run_id(&self) -> RunId {
        self.run.run_id()
    }

    fn is_quarantine_consumer_configured(&self) -> bool {
        self.index.consumer_configured
    }

    fn is_last_completed(&self) -> bool {
        self.index.latest_completed_run() == Some(self.run.run_id())
    }

    fn results(&self) -> Option<&RunResults> {
        self.run.results.as_ref()
    }

    fn save(&self, data: &QuarantineData) -> Result<(), SaveError> {
        self.index.persistence.save(data)
    }
}

/// Persistence that keeps quarantine data only in the history index itself.
#[derive(Clone, Copy, Debug)]
struct InMemoryPersistence;

impl QuarantinePersistence for InMemoryPersistence {
    fn save(&self, _data: &QuarantineData) -> Result<(), SaveError> {
        Ok(())
    }
}

/// Selector for identifying a run, either the most recent or by prefix.
///
/// The `Latest` variant selects the most recent completed run, while `Prefix`
/// selects a run by a prefix of its ID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RunIdSelector {
    /// Select the most recent completed run.
    #[default]
    Latest,

    /// Select a run by ID prefix.
    ///
    /// The prefix contains only hex digits and optional dashes.
    Prefix(String),
}

impl FromStr for RunIdSelector {
    type Err = InvalidRunIdSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "latest" {
            Ok(RunIdSelector::Latest)
        } else {
            let is_valid = !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
            if is_valid {
                Ok(RunIdSelector::Prefix(s.to_owned()))
            } else {
                Err(InvalidRunIdSelector {
                    input: s.to_owned(),
                })
            }
        }
    }
}

impl fmt::Display for RunIdSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunIdSelector::Latest => write!(f, "latest"),
            RunIdSelector::Prefix(prefix) => write!(f, "{prefix}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{TestCaseResult, TestId, TestStatus, TestSuiteResult};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn results_with(ids: &[&str]) -> RunResults {
        let suite_id = TestId::new("suite");
        let mut suite = TestSuiteResult::new(suite_id.clone());
        for id in ids {
            suite.push_case(TestCaseResult::new(
                TestId::for_case(&suite_id, id),
                *id,
                TestStatus::Passed,
            ));
        }
        let mut results = RunResults::new();
        results.push_suite(suite);
        results
    }

    #[test]
    fn previous_completed_run_skips_incomplete_runs() {
        let mut index = RunHistoryIndex::new(true);
        let first = index.record_run(RunStatus::Completed, Some(results_with(&["a"])));
        let second = index.record_run(RunStatus::Incomplete, None);
        let third = index.record_run(RunStatus::Completed, Some(results_with(&["a"])));

        assert_eq!(index.previous_completed_run(third), Some(first));
        assert_eq!(index.previous_completed_run(second), Some(first));
        assert_eq!(index.previous_completed_run(first), None);
        assert_eq!(index.latest_completed_run(), Some(third));
    }

    #[test]
    fn record_run_links_previous_results() {
        let mut index = RunHistoryIndex::new(true);
        let first = index.record_run(RunStatus::Completed, Some(results_with(&["a", "b"])));
        let second = index.record_run(RunStatus::Completed, Some(results_with(&["a", "c"])));

        let results = index.results_of(second).expect("second run has results");
        let linked = |id: &str| {
            results
                .find_case(&TestId::new(format!("suite::{id}")))
                .expect("case exists")
                .previous_run()
        };
        assert_eq!(linked("a"), Some(first));
        assert_eq!(linked("c"), None);
    }

    #[test]
    fn record_run_does_not_link_through_gaps() {
        let mut index = RunHistoryIndex::new(true);
        index.record_run(RunStatus::Completed, Some(results_with(&["a"])));
        index.record_run(RunStatus::Completed, Some(results_with(&["b"])));
        let third = index.record_run(RunStatus::Completed, Some(results_with(&["a"])));

        let case = index
            .results_of(third)
            .and_then(|results| results.find_case(&TestId::new("suite::a")))
            .expect("case exists");
        assert_eq!(case.previous_run(), None, "the latest run did not contain `a`");
    }

    #[test]
    fn push_run_rejects_duplicates() {
        let mut index = RunHistoryIndex::new(false);
        let info = RecordedRunInfo {
            run_id: RunId::new_v4(),
            status: RunStatus::Completed,
            recorded_at: Utc::now(),
        };
        index.push_run(info.clone(), None, None).expect("first push succeeds");
        let error = index
            .push_run(info.clone(), None, None)
            .expect_err("second push fails");
        assert_eq!(error.run_id, info.run_id);
    }

    #[test]
    fn propagate_keeps_existing_data() {
        let mut index = RunHistoryIndex::new(true);
        let run_id = index.record_run(RunStatus::Completed, Some(results_with(&["a"])));
        index
            .propagate(run_id, &PropagationOptions::default())
            .expect("first propagation succeeds");

        let mut data = index.quarantine_of(run_id).cloned().expect("data attached");
        data.quarantine(
            index.results_of(run_id).expect("run has results"),
            &TestId::new("suite::a"),
            "alice",
            "flaky",
            Utc::now(),
        )
        .expect("test case is in run");
        index.attach_quarantine(data).expect("run is in history");

        let error = index
            .propagate(run_id, &PropagationOptions::default())
            .expect_err("second propagation is refused");
        assert!(matches!(
            error,
            PropagateError::AlreadyPropagated { run_id: id } if id == run_id
        ));
        assert!(
            index
                .quarantine_of(run_id)
                .and_then(|data| data.get(&TestId::new("suite::a")))
                .is_some_and(|record| record.is_quarantined()),
            "explicit quarantine is kept"
        );

        let missing = RunId::new_v4();
        assert!(matches!(
            index.propagate(missing, &PropagationOptions::default()),
            Err(PropagateError::RunNotFound { .. })
        ));
    }

    #[test_case("latest", RunIdSelector::Latest; "latest")]
    #[test_case("abc123", RunIdSelector::Prefix("abc123".to_owned()); "hex prefix")]
    #[test_case("ab-12", RunIdSelector::Prefix("ab-12".to_owned()); "dashed prefix")]
    fn parse_run_id_selector(input: &str, expected: RunIdSelector) {
        assert_eq!(input.parse::<RunIdSelector>().expect("valid"), expected);
    }

    #[test_case(""; "empty")]
    #[test_case("xyz"; "non-hex")]
    fn parse_run_id_selector_invalid(input: &str) {
        input
            .parse::<RunIdSelector>()
            .expect_err("selector should be rejected");
    }

    #[test]
    fn resolve_selectors() {
        let mut index = RunHistoryIndex::new(true);
        assert!(matches!(
            index.resolve(&RunIdSelector::Latest),
            Err(RunIdResolutionError::NoCompletedRuns)
        ));

        let run = index.record_run(RunStatus::Completed, None);
        assert_eq!(index.resolve(&RunIdSelector::Latest).unwrap(), run);

        let full = run.to_string();
        assert_eq!(
            index
                .resolve(&RunIdSelector::Prefix(full[..8].to_owned()))
                .unwrap(),
            run
        );
        // The 13th hex digit of a v4 UUID is always 4.
        assert!(matches!(
            index.resolve(&RunIdSelector::Prefix("0000000000000".to_owned())),
            Err(RunIdResolutionError::NotFound { .. })
        ));
    }

    #[test]
    fn resolve_ambiguous_prefix() {
        let mut index = RunHistoryIndex::new(true);
        let ids: Vec<RunId> = [
            "abcd0000-0000-4000-8000-000000000001",
            "abcd0000-0000-4000-8000-000000000002",
            "ef010000-0000-4000-8000-000000000003",
        ]
        .iter()
        .map(|s| s.parse().expect("valid run ID"))
        .collect();
        for &run_id in &ids {
            let info = RecordedRunInfo {
                run_id,
                status: RunStatus::Completed,
                recorded_at: Utc::now(),
            };
            index.push_run(info, None, None).expect("run pushed");
        }

        match index.resolve(&RunIdSelector::Prefix("abcd".to_owned())) {
            Err(RunIdResolutionError::Ambiguous { prefix, candidates }) => {
                assert_eq!(prefix, "abcd");
                assert_eq!(candidates, ids[..2].to_vec());
            }
            other => panic!("expected ambiguous prefix, got {other:?}"),
        }
        assert_eq!(
            index
                .resolve(&RunIdSelector::Prefix("abcd0000-0000-4000-8000-000000000002".to_owned()))
                .expect("full ID is unique"),
            ids[1]
        );
        assert_eq!(
            index
                .resolve(&RunIdSelector::Prefix("ef01".to_owned()))
                .expect("unique prefix"),
            ids[2]
        );
    }
}
