// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::record::QuarantineRecord;
use crate::{
    errors::{QuarantineActionError, SaveError},
    history::RunId,
    results::{RunResults, TestId, TestObject},
};
use chrono::{DateTime, Utc};
use iddqd::IdOrdMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// The run that owns a [`QuarantineData`].
///
/// Consumers bind quarantine data to its run through
/// [`QuarantineData::view`].
pub trait OwningRun {
    /// Returns the run's identifier.
    fn run_id(&self) -> RunId;

    /// Returns true if the run's pipeline has a quarantine-aware consumer
    /// configured.
    fn is_quarantine_consumer_configured(&self) -> bool;

    /// Returns true if this is the most recently completed run of its
    /// pipeline.
    fn is_last_completed(&self) -> bool;

    /// Returns the run's aggregated test results, if any.
    fn results(&self) -> Option<&RunResults>;

    /// Persists the run along with `data`.
    fn save(&self, data: &QuarantineData) -> Result<(), SaveError>;
}

/// Durable storage for quarantine data.
pub trait QuarantinePersistence: Send + Sync {
    /// Writes `data` for its run.
    fn save(&self, data: &QuarantineData) -> Result<(), SaveError>;
}

/// The quarantine records of a single run, keyed by test identifier.
///
/// This is the authoritative map: it only ever contains records that were
/// inherited by the propagation engine or set by an explicit action.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuarantineData {
    run_id: RunId,
    quarantines: IdOrdMap<QuarantineRecord>,
}

impl QuarantineData {
    /// Creates empty quarantine data for a run.
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            quarantines: IdOrdMap::new(),
        }
    }

    /// Returns the run this data belongs to.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the stored record for a test, without consulting the policy
    /// gate or constructing defaults.
    pub fn get(&self, test_id: &TestId) -> Option<&QuarantineRecord> {
        self.quarantines.get(test_id)
    }

    /// Returns an iterator over all stored records, ordered by test ID.
    pub fn records(&self) -> impl Iterator<Item = &QuarantineRecord> + '_ {
        self.quarantines.iter()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.quarantines.len()
    }

    /// Returns true if there are no stored records.
    pub fn is_empty(&self) -> bool {
        self.quarantines.is_empty()
    }

    /// Inserts a record, replacing any existing record for the same test.
    pub(crate) fn add_quarantine(&mut self, record: QuarantineRecord) {
        debug_assert_eq!(
            record.run_id(),
            self.run_id,
            "records are only stored with their own run"
        );
        self.quarantines.insert_overwrite(record);
    }

    /// Quarantines a test case in this run.
    ///
    /// `results` must be this run's results: only test cases that are present
    /// in them can be quarantined.
    pub fn quarantine(
        &mut self,
        results: &RunResults,
        test_id: &TestId,
        quarantined_by: impl Into<String>,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<&QuarantineRecord, QuarantineActionError> {
        let mut record = self.record_for_action(results, test_id)?;
        record.quarantine(quarantined_by, reason, at);
        Ok(self.store_record(record))
    }

    /// Releases a test case in this run from quarantine.
    pub fn release(
        &mut self,
        results: &RunResults,
        test_id: &TestId,
        released_by: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<&QuarantineRecord, QuarantineActionError> {
        let mut record = self.record_for_action(results, test_id)?;
        if !record.is_quarantined() {
            return Err(QuarantineActionError::NotQuarantined {
                run_id: self.run_id,
                test_id: test_id.clone(),
            });
        }
        record.release(released_by, at);
        Ok(self.store_record(record))
    }

    fn record_for_action(
        &self,
        results: &RunResults,
        test_id: &TestId,
    ) -> Result<QuarantineRecord, QuarantineActionError> {
        if results.find_case(test_id).is_none() {
            return Err(QuarantineActionError::UnknownTestCase {
                run_id: self.run_id,
                test_id: test_id.clone(),
            });
        }
        Ok(self
            .quarantines
            .get(test_id)
            .cloned()
            .unwrap_or_else(|| QuarantineRecord::new_default(self.run_id, test_id.clone())))
    }

    fn store_record(&mut self, record: QuarantineRecord) -> &QuarantineRecord {
        let test_id = record.test_id().clone();
        self.add_quarantine(record);
        self.quarantines
            .get(&test_id)
            .expect("record was just inserted")
    }

    /// Binds this data to its owning run, returning a view for consumers.
    pub fn view<R: OwningRun>(&self, run: R) -> QuarantineView<'_, R> {
        debug_assert_eq!(run.run_id(), self.run_id, "data bound to its own run");
        QuarantineView { data: self, run }
    }
}

/// A consumer's view of a run's quarantine data.
///
/// This is the only interface a reporting layer should use: it applies the
/// policy gate and never exposes the underlying map.
#[derive(Clone, Debug)]
pub struct QuarantineView<'a, R> {
    data: &'a QuarantineData,
    run: R,
}

impl<'a, R: OwningRun> QuarantineView<'a, R> {
    /// Returns the quarantine record to display for a test object.
    ///
    /// Returns `None` if the run's pipeline has no quarantine-aware consumer
    /// configured, even if a record is stored. Otherwise, returns the stored
    /// record if there is one. Test cases without a stored record get a
    /// default, not-quarantined record which is not added to the data.
    pub fn records_for(&self, object: TestObject<'_>) -> Option<Cow<'a, QuarantineRecord>> {
        if !self.run.is_quarantine_consumer_configured() {
            return None;
        }

        let id = object.id();
        if let Some(record) = self.data.get(id) {
            return Some(Cow::Borrowed(record));
        }

        object.is_case().then(|| {
            Cow::Owned(QuarantineRecord::new_default(
                self.data.run_id(),
                id.clone(),
            ))
        })
    }

    /// Returns true if this view's run is the most recently completed run
    /// of its pipeline.
    ///
    /// Changing quarantine state only makes sense on the latest result.
    pub fn is_latest_result(&self) -> bool {
        self.run.is_last_completed()
    }

    /// Returns the test result with the given identifier in this run.
    pub fn result_for_test_id(&self, id: &TestId) -> Option<TestObject<'_>> {
        self.run.results()?.find_corresponding_result(id)
    }

    /// Persists the owning run, including this data.
    pub fn save(&self) -> Result<(), SaveError> {
        self.run.save(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        quarantine::RecordOrigin,
        results::{TestCaseResult, TestStatus, TestSuiteResult},
    };
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use test_case::test_case;

    struct FakeRun {
        run_id: RunId,
        configured: bool,
        latest: bool,
        results: RunResults,
        saves: Cell<usize>,
    }

    impl OwningRun for &FakeRun {
        fn run_id(&self) -> RunId {
            self.run_id
        }

        fn is_quarantine_consumer_configured(&self) -> bool {
            self.configured
        }

        fn is_last_completed(&self) -> bool {
            self.latest
        }

        fn results(&self) -> Option<&RunResults> {
            Some(&self.results)
        }

        fn save(&self, _data: &QuarantineData) -> Result<(), SaveError> {
            self.saves.set(self.saves.get() + 1);
            Ok(())
        }
    }

    fn fake_run(configured: bool) -> FakeRun {
        let suite_id = TestId::new("suite");
        let mut suite = TestSuiteResult::new(suite_id.clone());
        for name in ["quarantined", "plain"] {
            suite.push_case(TestCaseResult::new(
                TestId::for_case(&suite_id, name),
                name,
                TestStatus::Failed,
            ));
        }
        let mut results = RunResults::new();
        results.push_suite(suite);

        FakeRun {
            run_id: RunId::new_v4(),
            configured,
            latest: true,
            results,
            saves: Cell::new(0),
        }
    }

    fn data_for(run: &FakeRun) -> QuarantineData {
        let mut data = QuarantineData::new(run.run_id);
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        data.quarantine(
            &run.results,
            &TestId::new("suite::quarantined"),
            "alice",
            "flaky",
            at,
        )
        .expect("test case exists");
        data
    }

    #[test_case(true, "suite::quarantined", Some(true); "gate open, stored record")]
    #[test_case(true, "suite::plain", Some(false); "gate open, default record")]
    #[test_case(false, "suite::quarantined", None; "gate closed, stored record")]
    #[test_case(false, "suite::plain", None; "gate closed, default record")]
    fn records_for_case(configured: bool, id: &str, expected: Option<bool>) {
        let run = fake_run(configured);
        let data = data_for(&run);
        let view = data.view(&run);

        let case = run
            .results
            .find_case(&TestId::new(id))
            .expect("case exists");
        let record = view.records_for(TestObject::Case(case));
        assert_eq!(
            record.as_ref().map(|record| record.is_quarantined()),
            expected
        );
    }

    #[test]
    fn default_records_are_not_stored() {
        let run = fake_run(true);
        let data = data_for(&run);
        let view = data.view(&run);

        let case = run
            .results
            .find_case(&TestId::new("suite::plain"))
            .expect("case exists");
        let record = view
            .records_for(TestObject::Case(case))
            .expect("gate is open");
        assert!(matches!(record, Cow::Owned(_)));
        assert_eq!(record.origin(), RecordOrigin::Default);
        assert_eq!(record.test_id(), &case.id);
        assert_eq!(data.len(), 1, "only the explicit record is stored");
    }

    #[test]
    fn suites_without_records_get_nothing() {
        let run = fake_run(true);
        let data = data_for(&run);
        let view = data.view(&run);

        let suite = run
            .results
            .suites
            .get(&TestId::new("suite"))
            .expect("suite exists");
        assert!(view.records_for(TestObject::Suite(suite)).is_none());
    }

    #[test]
    fn view_delegates_to_run() {
        let mut run = fake_run(true);
        run.latest = false;
        let data = data_for(&run);
        let view = data.view(&run);

        assert!(!view.is_latest_result());
        assert!(
            view.result_for_test_id(&TestId::new("suite::plain"))
                .is_some_and(|object| object.is_case())
        );
        assert!(view.result_for_test_id(&TestId::new("missing")).is_none());

        view.save().expect("save succeeds");
        assert_eq!(run.saves.get(), 1);
    }

    #[test]
    fn actions_require_known_test_cases() {
        let run = fake_run(true);
        let mut data = QuarantineData::new(run.run_id);
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();

        let error = data
            .quarantine(&run.results, &TestId::new("suite::gone"), "alice", "x", at)
            .expect_err("unknown test case");
        assert!(matches!(
            error,
            QuarantineActionError::UnknownTestCase { .. }
        ));

        let error = data
            .release(&run.results, &TestId::new("suite::plain"), "bob", at)
            .expect_err("not quarantined");
        assert!(matches!(error, QuarantineActionError::NotQuarantined { .. }));

        data.quarantine(&run.results, &TestId::new("suite::plain"), "alice", "x", at)
            .expect("quarantine succeeds");
        let record = data
            .release(&run.results, &TestId::new("suite::plain"), "bob", at)
            .expect("release succeeds");
        assert!(!record.is_quarantined());
        assert_eq!(record.origin(), RecordOrigin::Explicit);
    }
}
