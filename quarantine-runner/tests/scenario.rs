// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end propagation through an on-disk history store.

use camino_tempfile::{Utf8TempDir, tempdir};
use chrono::Utc;
use pretty_assertions::assert_eq;
use quarantine_runner::{
    config::PipelineConfig,
    errors::PropagateError,
    history::{RunHistory, RunHistoryIndex, RunId, RunStatus},
    quarantine::{PropagationOptions, QuarantineData, RecordOrigin},
    results::{RunResults, TestCaseResult, TestId, TestObject, TestStatus, TestSuiteResult},
    store::HistoryStore,
};

fn results_with(names: &[&str]) -> RunResults {
    let suite_id = TestId::new("com.example.CheckoutTest");
    let mut suite = TestSuiteResult::new(suite_id.clone());
    for name in names {
        suite.push_case(TestCaseResult::new(
            TestId::for_case(&suite_id, name),
            *name,
            TestStatus::Failed,
        ));
    }
    let mut results = RunResults::new();
    results.push_suite(suite);
    results
}

fn t1() -> TestId {
    TestId::new("com.example.CheckoutTest::t1")
}

struct Pipeline {
    _dir: Utf8TempDir,
    store: HistoryStore,
}

impl Pipeline {
    fn new() -> Self {
        let dir = tempdir().expect("created temp dir");
        let store = HistoryStore::new(dir.path()).expect("store opened");
        Self { _dir: dir, store }
    }

    fn load(&self) -> RunHistoryIndex {
        self.store.load(true).expect("history loaded")
    }

    /// Records a completed run, then propagates and saves its quarantine data.
    fn complete_run(&self, names: &[&str]) -> RunId {
        let run_id = self
            .store
            .record_run(RunStatus::Completed, Some(results_with(names)))
            .expect("run recorded");
        let mut history = self.load();
        let run = history
            .propagate(run_id, &PropagationOptions::default())
            .expect("run is in history");
        run.quarantine_view()
            .expect("data attached")
            .save()
            .expect("data saved");
        run_id
    }

    fn quarantine_latest(&self, test_id: &TestId) {
        self.act_on_latest(|data, results| {
            data.quarantine(results, test_id, "alice", "fails under load", Utc::now())
                .expect("test case is in run");
        });
    }

    fn release_latest(&self, test_id: &TestId) {
        self.act_on_latest(|data, results| {
            data.release(results, test_id, "bob", Utc::now())
                .expect("test case is in run");
        });
    }

    /// Applies an explicit action to the latest completed run and saves it.
    fn act_on_latest(&self, action: impl FnOnce(&mut QuarantineData, &RunResults)) {
        let mut history = self.load();
        let run_id = history.latest_completed_run().expect("a run completed");
        let mut data = history
            .quarantine_of(run_id)
            .cloned()
            .unwrap_or_else(|| QuarantineData::new(run_id));
        action(
            &mut data,
            history.results_of(run_id).expect("run has results"),
        );
        history.attach_quarantine(data).expect("run is in history");

        let view = history
            .run(run_id)
            .and_then(|run| run.quarantine_view())
            .expect("data attached");
        assert!(view.is_latest_result());
        view.save().expect("data saved");
    }
}

#[test]
fn quarantine_survives_a_skipped_run() {
    let pipeline = Pipeline::new();

    // Run 1: T1 has never been seen, so nothing is inherited.
    let run1 = pipeline.complete_run(&["t1", "t2"]);
    let history = pipeline.load();
    assert!(history.quarantine_of(run1).expect("data saved").is_empty());

    // T1 is quarantined by hand after run 1.
    pipeline.quarantine_latest(&t1());

    // Run 2: T1 is linked directly to run 1 and inherits.
    let run2 = pipeline.complete_run(&["t1", "t2"]);
    let history = pipeline.load();
    let record = history
        .quarantine_of(run2)
        .and_then(|data| data.get(&t1()))
        .expect("T1 inherited");
    assert!(record.is_quarantined());
    assert_eq!(record.origin(), RecordOrigin::Inherited { from_run: run1 });
    let explicit = history
        .quarantine_of(run1)
        .and_then(|data| data.get(&t1()))
        .expect("explicit record");
    assert_eq!(record.provenance(), explicit.provenance());

    // Run 3 skips T1 entirely.
    let run3 = pipeline.complete_run(&["t2"]);
    let history = pipeline.load();
    assert!(history.quarantine_of(run3).expect("data saved").is_empty());

    // Run 4: no direct link, so the search skips run 3 and finds run 2.
    let run4 = pipeline.complete_run(&["t1", "t2"]);
    let history = pipeline.load();
    let case = history
        .results_of(run4)
        .and_then(|results| results.find_case(&t1()))
        .expect("T1 is in run 4");
    assert_eq!(case.previous_run(), None);

    let record = history
        .quarantine_of(run4)
        .and_then(|data| data.get(&t1()))
        .expect("T1 inherited");
    assert!(record.is_quarantined());
    assert_eq!(record.origin(), RecordOrigin::Inherited { from_run: run2 });
    assert!(
        history
            .quarantine_of(run4)
            .and_then(|data| data.get(&TestId::new("com.example.CheckoutTest::t2")))
            .is_none()
    );
}

#[test]
fn incomplete_runs_are_skipped() {
    let pipeline = Pipeline::new();
    pipeline.complete_run(&["t1"]);
    pipeline.quarantine_latest(&t1());

    pipeline
        .store
        .record_run(RunStatus::Incomplete, Some(results_with(&["t2"])))
        .expect("run recorded");

    let run = pipeline.complete_run(&["t1"]);
    let history = pipeline.load();
    let record = history
        .quarantine_of(run)
        .and_then(|data| data.get(&t1()))
        .expect("T1 inherited across the incomplete run");
    assert!(record.is_quarantined());
}

#[test]
fn closed_gate_hides_stored_records() {
    let pipeline = Pipeline::new();
    pipeline.complete_run(&["t1"]);
    pipeline.quarantine_latest(&t1());

    let history = pipeline.store.load(false).expect("history loaded");
    let run_id = history.latest_completed_run().expect("a run completed");
    let view = history
        .run(run_id)
        .and_then(|run| run.quarantine_view())
        .expect("data attached");

    let results = history.results_of(run_id).expect("run has results");
    let case = results.find_case(&t1()).expect("T1 is in run");
    assert!(view.records_for(TestObject::Case(case)).is_none());
    assert!(
        history
            .quarantine_of(run_id)
            .and_then(|data| data.get(&t1()))
            .is_some_and(|record| record.is_quarantined()),
        "the record is still stored"
    );
}

#[test]
fn older_runs_are_not_latest() {
    let pipeline = Pipeline::new();
    let run1 = pipeline.complete_run(&["t1"]);
    let run2 = pipeline.complete_run(&["t1"]);

    let history = pipeline.load();
    let latest = |run_id| {
        history
            .run(run_id)
            .and_then(|run| run.quarantine_view())
            .expect("data attached")
            .is_latest_result()
    };
    assert!(!latest(run1));
    assert!(latest(run2));
}

#[test]
fn default_config_matches_store_gate() {
    let pipeline = Pipeline::new();
    let config = PipelineConfig::default_config();
    let history = pipeline
        .store
        .load(config.is_quarantine_consumer_configured())
        .expect("history loaded");
    assert!(history.is_quarantine_consumer_configured());
}

#[test]
fn propagating_again_keeps_explicit_quarantine() {
    let pipeline = Pipeline::new();
    let run = pipeline.complete_run(&["t1"]);
    pipeline.quarantine_latest(&t1());

    let mut history = pipeline.load();
    let error = history
        .propagate(run, &PropagationOptions::default())
        .expect_err("already propagated");
    assert!(matches!(
        error,
        PropagateError::AlreadyPropagated { run_id } if run_id == run
    ));

    let record = history
        .quarantine_of(run)
        .and_then(|data| data.get(&t1()))
        .expect("explicit record kept");
    assert!(record.is_quarantined());
    assert_eq!(record.origin(), RecordOrigin::Explicit);

    let history = pipeline.load();
    assert!(
        history
            .quarantine_of(run)
            .and_then(|data| data.get(&t1()))
            .is_some_and(|record| record.is_quarantined()),
        "stored record is still quarantined"
    );
}

#[test]
fn propagating_again_keeps_explicit_release() {
    let pipeline = Pipeline::new();
    pipeline.complete_run(&["t1"]);
    pipeline.quarantine_latest(&t1());

    // Run 2 inherits the quarantine, which is then released by hand.
    let run2 = pipeline.complete_run(&["t1"]);
    pipeline.release_latest(&t1());

    let mut history = pipeline.load();
    assert!(matches!(
        history.propagate(run2, &PropagationOptions::default()),
        Err(PropagateError::AlreadyPropagated { .. })
    ));

    let history = pipeline.load();
    let record = history
        .quarantine_of(run2)
        .and_then(|data| data.get(&t1()))
        .expect("explicit record kept");
    assert!(!record.is_quarantined());
    assert_eq!(record.origin(), RecordOrigin::Explicit);

    // The release stops the quarantine from reaching run 3.
    let run3 = pipeline.complete_run(&["t1"]);
    let history = pipeline.load();
    assert!(
        history
            .quarantine_of(run3)
            .and_then(|data| data.get(&t1()))
            .is_none()
    );
}
