// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line front end for recording test runs and carrying test
//! quarantines forward between them.
//!
//! The history lives in a store directory (`.quarantine` by default). A
//! typical pipeline records each run with `quarantine record`, then computes
//! its quarantine data with `quarantine propagate`. People quarantine and
//! release tests on the latest completed run with `quarantine quarantine` and
//! `quarantine release`.

#![warn(missing_docs)]

mod dispatch;
mod output;

#[doc(hidden)]
pub use dispatch::QuarantineApp;
#[doc(hidden)]
pub use output::OutputContext;
