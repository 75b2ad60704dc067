// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{history::RunId, results::TestId};
use chrono::{DateTime, Utc};
use iddqd::{IdOrdItem, id_upcast};
use serde::{Deserialize, Serialize};

/// Who quarantined a test, when and why.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuarantineProvenance {
    /// The user who quarantined the test.
    pub quarantined_by: String,

    /// When the test was quarantined.
    pub quarantined_at: DateTime<Utc>,

    /// Why the test was quarantined.
    pub reason: String,
}

/// Who released a test from quarantine, and when.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReleaseInfo {
    /// The user who released the test.
    pub released_by: String,

    /// When the test was released.
    pub released_at: DateTime<Utc>,
}

/// The quarantine state of a test case in a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum QuarantineState {
    /// The test is not quarantined.
    #[default]
    NotQuarantined,

    /// The test is quarantined.
    Quarantined(QuarantineProvenance),

    /// The test was quarantined and has since been released.
    Released(ReleaseInfo),
}

/// Where a quarantine record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordOrigin {
    /// Copied forward from the record of an earlier run.
    Inherited {
        /// The run the state was copied from.
        from_run: RunId,
    },

    /// Set by an explicit action on this run.
    Explicit,

    /// Constructed on demand for a test case without a stored record.
    ///
    /// Records with this origin are never stored.
    Default,
}

/// Quarantine state for one test case in one run.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuarantineRecord {
    run_id: RunId,
    test_id: TestId,
    state: QuarantineState,
    origin: RecordOrigin,
}

impl QuarantineRecord {
    /// Creates a default, not-quarantined record for a test case.
    pub fn new_default(run_id: RunId, test_id: TestId) -> Self {
        Self {
            run_id,
            test_id,
            state: QuarantineState::NotQuarantined,
            origin: RecordOrigin::Default,
        }
    }

    /// Creates a record for `test_id` in `run_id` that inherits the state of
    /// `previous`.
    ///
    /// The new record is a copy: `previous` is left untouched.
    pub fn inherit(run_id: RunId, test_id: TestId, previous: &QuarantineRecord) -> Self {
        Self {
            run_id,
            test_id,
            state: previous.state.clone(),
            origin: RecordOrigin::Inherited {
                from_run: previous.run_id,
            },
        }
    }

    /// Returns the run this record belongs to.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the test case this record is for.
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// Returns the quarantine state.
    pub fn state(&self) -> &QuarantineState {
        &self.state
    }

    /// Returns where this record came from.
    pub fn origin(&self) -> RecordOrigin {
        self.origin
    }

    /// Returns true if the test is currently quarantined.
    pub fn is_quarantined(&self) -> bool {
        matches!(self.state, QuarantineState::Quarantined(_))
    }

    /// Returns the quarantine provenance, if the test is quarantined.
    pub fn provenance(&self) -> Option<&QuarantineProvenance> {
        match &self.state {
            QuarantineState::Quarantined(provenance) => Some(provenance),
            QuarantineState::NotQuarantined | QuarantineState::Released(_) => None,
        }
    }

    /// Quarantines the test.
    pub fn quarantine(
        &mut self,
        quarantined_by: impl Into<String>,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.state = QuarantineState::Quarantined(QuarantineProvenance {
            quarantined_by: quarantined_by.into(),
            quarantined_at: at,
            reason: reason.into(),
        });
        self.origin = RecordOrigin::Explicit;
    }

    /// Releases the test from quarantine.
    pub fn release(&mut self, released_by: impl Into<String>, at: DateTime<Utc>) {
        self.state = QuarantineState::Released(ReleaseInfo {
            released_by: released_by.into(),
            released_at: at,
        });
        self.origin = RecordOrigin::Explicit;
    }
}

impl IdOrdItem for QuarantineRecord {
    type Key<'a> = &'a TestId;
    fn key(&self) -> Self::Key<'_> {
        &self.test_id
    }
    id_upcast!();
}
