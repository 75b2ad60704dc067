// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by quarantine-runner.

use crate::{history::RunId, results::TestId};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse quarantine config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The config named a publisher that isn't registered.
    #[error(transparent)]
    UnknownPublisher(#[from] UnknownPublisherError),
}

/// A publisher named in the config is not registered.
#[derive(Clone, Debug, Error)]
#[error("unknown publisher `{id}` (known publishers: {})", .known.join(", "))]
pub struct UnknownPublisherError {
    id: String,
    known: Vec<String>,
}

impl UnknownPublisherError {
    pub(crate) fn new(
        id: impl Into<String>,
        known: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut known: Vec<_> = known.into_iter().map(|s| s.into()).collect();
        known.sort_unstable();
        Self {
            id: id.into(),
            known,
        }
    }

    /// Returns the unknown publisher ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// An error that occurred while persisting a run's quarantine data.
#[derive(Debug, Error)]
#[error("error saving quarantine data for run {run_id} to `{path}`")]
#[non_exhaustive]
pub struct SaveError {
    /// The run whose data could not be saved.
    pub run_id: RunId,

    /// The file that could not be written.
    pub path: Utf8PathBuf,

    /// What went wrong.
    #[source]
    pub kind: SaveErrorKind,
}

/// The kind of error that occurred while saving quarantine data.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SaveErrorKind {
    /// The run's directory could not be created.
    #[error("error creating run directory")]
    DirCreate(#[source] std::io::Error),

    /// The file could not be written atomically.
    #[error("error writing file")]
    Write(#[source] atomicwrites::Error<std::io::Error>),
}

/// A run was added to a history that already contains it.
#[derive(Clone, Debug, Error)]
#[error("run {run_id} is already present in the history")]
pub struct DuplicateRunError {
    /// The duplicated run.
    pub run_id: RunId,
}

/// A quarantine action could not be applied.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum QuarantineActionError {
    /// The test case is not part of the run's results.
    #[error("test case `{test_id}` is not part of run {run_id}")]
    UnknownTestCase {
        /// The run the action was applied to.
        run_id: RunId,

        /// The test case.
        test_id: TestId,
    },

    /// A release was requested for a test case that is not quarantined.
    #[error("test case `{test_id}` is not quarantined in run {run_id}")]
    NotQuarantined {
        /// The run the action was applied to.
        run_id: RunId,

        /// The test case.
        test_id: TestId,
    },

    /// The run is not the latest completed run of its pipeline.
    #[error("run {run_id} is not the latest completed run (latest: {})", .latest.map_or_else(|| "none".to_owned(), |id| id.to_string()))]
    StaleRun {
        /// The run the action was applied to.
        run_id: RunId,

        /// The latest completed run, if any.
        latest: Option<RunId>,
    },

    /// The run has no test results.
    #[error("run {run_id} has no test results")]
    NoResults {
        /// The run the action was applied to.
        run_id: RunId,
    },
}

/// An invalid run ID selector was provided.
#[derive(Clone, Debug, Error)]
#[error("invalid run ID selector `{input}`: expected `latest` or hex digits")]
pub struct InvalidRunIdSelector {
    /// The invalid input.
    pub input: String,
}

/// An error resolving a run ID selector.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RunIdResolutionError {
    /// No run matched the prefix.
    #[error("no run found matching `{prefix}`")]
    NotFound {
        /// The prefix that was searched for.
        prefix: String,
    },

    /// More than one run matched the prefix.
    #[error(
        "prefix `{prefix}` is ambiguous, matching {} runs: {}",
        .candidates.len(),
        .candidates.iter().join(", ")
    )]
    Ambiguous {
        /// The prefix that was searched for.
        prefix: String,

        /// The runs that matched.
        candidates: Vec<RunId>,
    },

    /// `latest` was requested, but no run has completed.
    #[error("no completed runs found")]
    NoCompletedRuns,
}

/// An error that occurred while reading or writing the history store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HistoryStoreError {
    /// An error occurred while creating a store directory.
    #[error("error creating directory `{dir}`")]
    DirCreate {
        /// The directory that could not be created.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while reading a file in the store.
    #[error("error reading `{path}`")]
    Read {
        /// The file that could not be read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while deserializing a file in the store.
    #[error("error deserializing `{path}`")]
    Deserialize {
        /// The file that could not be deserialized.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// An error occurred while writing a file in the store.
    #[error("error writing `{path}`")]
    Write {
        /// The file that could not be written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },

    /// The run list was written by a newer version of this tool.
    #[error(
        "run list `{path}` has format version {found}, \
         but only versions up to {supported} are supported"
    )]
    UnsupportedFormatVersion {
        /// The run list file.
        path: Utf8PathBuf,

        /// The version found in the file.
        found: u32,

        /// The newest version this tool supports.
        supported: u32,
    },

    /// The run list contains the same run twice.
    #[error("run list is corrupt")]
    DuplicateRun(#[from] DuplicateRunError),

    /// The quarantine data stored for a run names a different run.
    #[error("quarantine data at `{path}` belongs to run {found}, expected run {expected}")]
    MismatchedRun {
        /// The quarantine data file.
        path: Utf8PathBuf,

        /// The run the file is stored under.
        expected: RunId,

        /// The run named in the file.
        found: RunId,
    },

    /// An error occurred while opening or locking the store's lock file.
    #[error("error acquiring lock on `{path}`")]
    FileLock {
        /// The lock file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Another process held the store's lock for too long.
    #[error("timed out after {timeout_secs}s waiting for lock on `{path}`")]
    FileLockTimeout {
        /// The lock file.
        path: Utf8PathBuf,

        /// How long we waited.
        timeout_secs: u64,
    },
}

/// An error computing a run's quarantine data.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum PropagateError {
    /// The run is not in the history.
    #[error("run {run_id} is not in the history")]
    RunNotFound {
        /// The run that was requested.
        run_id: RunId,
    },

    /// The run's quarantine data was already computed.
    ///
    /// Quarantine data is created once per run.
    #[error("quarantine data for run {run_id} has already been computed")]
    AlreadyPropagated {
        /// The run that was requested.
        run_id: RunId,
    },
}
