// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-run quarantine records and their propagation across runs.
//!
//! - [`QuarantineRecord`]: the quarantine state of one test case in one run.
//! - [`QuarantineData`]: all records of a run, keyed by test identifier.
//! - [`QuarantineView`]: the gated, read-mostly interface consumers use.
//! - [`compute_quarantine_data`]: builds a run's data by inheriting active
//!   quarantines from earlier runs.

mod data;
mod engine;
mod record;

pub use data::{OwningRun, QuarantineData, QuarantinePersistence, QuarantineView};
pub use engine::{PropagationOptions, compute_quarantine_data};
pub use record::{
    QuarantineProvenance, QuarantineRecord, QuarantineState, RecordOrigin, ReleaseInfo,
};
