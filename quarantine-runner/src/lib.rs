// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test quarantine tracking across a history of runs.
//!
//! A quarantined test is excluded from failing its run while a known issue is
//! investigated. This crate makes that state sticky: when a run completes,
//! [`compute_quarantine_data`](quarantine::compute_quarantine_data) carries
//! each active quarantine forward from the nearest earlier occurrence of the
//! same test, even across runs that skipped it.

#![warn(missing_docs)]

pub mod config;
pub mod errors;
pub mod history;
pub mod quarantine;
pub mod registry;
pub mod results;
pub mod store;
