// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quarantine propagation.
//!
//! When a run completes, each of its test cases inherits quarantine from the
//! nearest earlier occurrence of the same test. The nearest occurrence is
//! found through the orchestrator's previous-result link if there is one,
//! and otherwise by walking back through completed runs until a run
//! containing the test is found or the history is exhausted.

use super::{QuarantineData, QuarantineRecord};
use crate::{
    history::{RunHistory, RunId},
    results::{RunResults, TestCaseResult},
};
use std::num::NonZero;
use tracing::{debug, warn};

/// Options controlling quarantine propagation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropagationOptions {
    /// The maximum number of runs to walk back through when looking for an
    /// earlier occurrence of a test.
    ///
    /// `None` means the walk is bounded only by the start of the history.
    pub max_history_hops: Option<NonZero<usize>>,
}

/// Computes the quarantine data for a newly completed run.
///
/// `results` are the results of `run`. The returned data contains a record for
/// every test case that inherits an active quarantine; all other test cases
/// are absent.
pub fn compute_quarantine_data<H: RunHistory>(
    run: RunId,
    history: &H,
    results: &RunResults,
    options: &PropagationOptions,
) -> QuarantineData {
    let mut data = QuarantineData::new(run);
    let mut seen = 0usize;

    for case in results.cases() {
        seen += 1;
        let Some(previous) = find_previous_record(run, case, history, options) else {
            continue;
        };
        if previous.is_quarantined() {
            data.add_quarantine(QuarantineRecord::inherit(run, case.id.clone(), previous));
        }
    }

    debug!(
        "run {run}: {} of {seen} test cases inherited quarantine",
        data.len()
    );
    data
}

/// The result of looking up a test case's nearest earlier occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PreviousLookup {
    /// An earlier occurrence was found in this run.
    Found(RunId),

    /// No earlier run contains the test.
    NotFound,

    /// A completed run had no results, so the lookup was abandoned.
    MissingResults(RunId),

    /// The configured hop limit was reached before a match was found.
    HopLimitReached,
}

/// Finds the run holding the nearest earlier occurrence of `case`.
pub(crate) fn find_previous_run<H: RunHistory>(
    run: RunId,
    case: &TestCaseResult,
    history: &H,
    options: &PropagationOptions,
) -> PreviousLookup {
    if let Some(previous_run) = case.previous_run() {
        return PreviousLookup::Found(previous_run);
    }

    let mut cursor = run;
    let mut hops = 0usize;
    loop {
        if let Some(max) = options.max_history_hops
            && hops >= max.get()
        {
            return PreviousLookup::HopLimitReached;
        }

        let Some(previous_run) = history.previous_completed_run(cursor) else {
            return PreviousLookup::NotFound;
        };
        hops += 1;
        cursor = previous_run;

        debug!(
            "no immediate predecessor for {}, looking in earlier run {previous_run}",
            case.id
        );
        let Some(previous_results) = history.results_of(previous_run) else {
            return PreviousLookup::MissingResults(previous_run);
        };
        if previous_results.find_case(&case.id).is_some() {
            return PreviousLookup::Found(previous_run);
        }
    }
}

fn find_previous_record<'h, H: RunHistory>(
    run: RunId,
    case: &TestCaseResult,
    history: &'h H,
    options: &PropagationOptions,
) -> Option<&'h QuarantineRecord> {
    match find_previous_run(run, case, history, options) {
        PreviousLookup::Found(previous_run) => history
            .quarantine_of(previous_run)
            .and_then(|data| data.get(&case.id)),
        PreviousLookup::NotFound => None,
        PreviousLookup::MissingResults(previous_run) => {
            warn!(
                "completed run {previous_run} has no test results, \
                 skipping quarantine propagation for {}",
                case.id
            );
            None
        }
        PreviousLookup::HopLimitReached => {
            warn!(
                "no earlier occurrence of {} within {} runs, \
                 skipping quarantine propagation",
                case.id,
                options.max_history_hops.map_or(0, NonZero::get),
            );
            None
        }
    }
}
