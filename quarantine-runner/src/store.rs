// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk storage for a pipeline's run history.
//!
//! The store is a directory containing:
//!
//! - `runs.json`: the list of recorded runs, oldest first.
//! - `runs/<run-id>/results.json`: each run's aggregated test results, if it
//!   produced any.
//! - `runs/<run-id>/quarantine.json`: each run's quarantine data, once it has
//!   been computed.
//! - `runs.lock`: a lock file. Readers take a shared lock on it, and writers
//!   that read-modify-write the history take an exclusive lock.
//!
//! All writes are atomic. The run list is written last, so a run only becomes
//! visible once its results are on disk.

use crate::{
    errors::{HistoryStoreError, SaveError, SaveErrorKind},
    history::{RecordedRunInfo, RunHistory, RunHistoryIndex, RunId, RunStatus},
    quarantine::{QuarantineData, QuarantinePersistence},
    results::RunResults,
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fs::{File, TryLockError},
    io::{self, BufReader},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

static RUNS_LOCK_FILE_NAME: &str = "runs.lock";
static RUNS_JSON_FILE_NAME: &str = "runs.json";
static RUNS_DIR_NAME: &str = "runs";
static RESULTS_JSON_FILE_NAME: &str = "results.json";
static QUARANTINE_JSON_FILE_NAME: &str = "quarantine.json";

/// The newest run list format this version understands.
const RUN_LIST_FORMAT_VERSION: u32 = 1;

/// The serialized list of runs in `runs.json`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct RunList {
    format_version: u32,
    runs: Vec<RecordedRunInfo>,
}

/// A directory storing a pipeline's run history.
///
/// Reads take a shared lock on `runs.lock` in the store directory. Anything
/// that reads the history and then writes to it should hold the exclusive
/// lock from [`lock_exclusive`](Self::lock_exclusive) throughout.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    store_dir: Utf8PathBuf,
}

impl HistoryStore {
    /// Opens the store at the given directory, creating it if necessary.
    pub fn new(store_dir: &Utf8Path) -> Result<Self, HistoryStoreError> {
        let runs_dir = store_dir.join(RUNS_DIR_NAME);
        std::fs::create_dir_all(&runs_dir).map_err(|error| HistoryStoreError::DirCreate {
            dir: runs_dir,
            error,
        })?;
        Ok(Self {
            store_dir: store_dir.to_owned(),
        })
    }

    /// Returns the store directory.
    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    /// Returns the directory holding a run's files.
    pub fn run_dir(&self, run_id: RunId) -> Utf8PathBuf {
        self.store_dir
            .join(RUNS_DIR_NAME)
            .join(run_id.to_string())
    }

    /// Loads the full history under a shared lock.
    ///
    /// `consumer_configured` is the pipeline's policy gate. Quarantine data
    /// saved through the returned index is written back to this store.
    pub fn load(&self, consumer_configured: bool) -> Result<RunHistoryIndex, HistoryStoreError> {
        let _lock = self.acquire_lock(LockKind::Shared)?;
        self.load_unlocked(consumer_configured)
    }

    /// Acquires an exclusive lock on the store.
    ///
    /// The lock is released when the returned value is dropped.
    pub fn lock_exclusive(&self) -> Result<ExclusiveLockedHistoryStore<'_>, HistoryStoreError> {
        let file = self.acquire_lock(LockKind::Exclusive)?;
        Ok(ExclusiveLockedHistoryStore {
            store: self,
            locked_file: DebugIgnore(file),
        })
    }

    /// Records a new run at the end of the history, under an exclusive lock.
    ///
    /// Test cases are linked to the latest completed run where it has a result
    /// with the same identifier.
    pub fn record_run(
        &self,
        status: RunStatus,
        results: Option<RunResults>,
    ) -> Result<RunId, HistoryStoreError> {
        self.lock_exclusive()?.record_run(status, results)
    }

    fn acquire_lock(&self, kind: LockKind) -> Result<File, HistoryStoreError> {
        let lock_file_path = self.store_dir.join(RUNS_LOCK_FILE_NAME);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file_path)
            .map_err(|error| HistoryStoreError::FileLock {
                path: lock_file_path.clone(),
                error,
            })?;

        acquire_lock_with_retry(&file, &lock_file_path, kind)?;
        Ok(file)
    }

    fn load_unlocked(&self, consumer_configured: bool) -> Result<RunHistoryIndex, HistoryStoreError> {
        let list = self.read_run_list()?;
        let mut index = RunHistoryIndex::with_persistence(consumer_configured, Box::new(self.clone()));

        for info in list.runs {
            let run_dir = self.run_dir(info.run_id);
            let results: Option<RunResults> =
                read_json_if_exists(&run_dir.join(RESULTS_JSON_FILE_NAME))?;

            let quarantine_path = run_dir.join(QUARANTINE_JSON_FILE_NAME);
            let quarantine: Option<QuarantineData> = read_json_if_exists(&quarantine_path)?;
            if let Some(data) = &quarantine
                && data.run_id() != info.run_id
            {
                return Err(HistoryStoreError::MismatchedRun {
                    path: quarantine_path,
                    expected: info.run_id,
                    found: data.run_id(),
                });
            }

            index.push_run(info, results, quarantine)?;
        }

        debug!("loaded {} runs from {}", index.len(), self.store_dir);
        Ok(index)
    }

    fn read_run_list(&self) -> Result<RunList, HistoryStoreError> {
        let path = self.store_dir.join(RUNS_JSON_FILE_NAME);
        let list: Option<RunList> = read_json_if_exists(&path)?;
        let Some(list) = list else {
            // The file doesn't exist yet: this is an empty store.
            return Ok(RunList {
                format_version: RUN_LIST_FORMAT_VERSION,
                runs: Vec::new(),
            });
        };

        if list.format_version > RUN_LIST_FORMAT_VERSION {
            return Err(HistoryStoreError::UnsupportedFormatVersion {
                path,
                found: list.format_version,
                supported: RUN_LIST_FORMAT_VERSION,
            });
        }
        Ok(list)
    }
}

impl QuarantinePersistence for HistoryStore {
    fn save(&self, data: &QuarantineData) -> Result<(), SaveError> {
        let run_id = data.run_id();
        let run_dir = self.run_dir(run_id);
        let path = run_dir.join(QUARANTINE_JSON_FILE_NAME);

        if let Err(error) = std::fs::create_dir_all(&run_dir) {
            return Err(SaveError {
                run_id,
                path,
                kind: SaveErrorKind::DirCreate(error),
            });
        }
        write_json(&path, data).map_err(|error| SaveError {
            run_id,
            path,
            kind: SaveErrorKind::Write(error),
        })?;

        debug!("saved {} quarantine records for run {run_id}", data.len());
        Ok(())
    }
}

/// A history store that has been locked for exclusive access.
///
/// The lifetime parameter ensures this isn't held for longer than the
/// corresponding [`HistoryStore`].
#[derive(Debug)]
pub struct ExclusiveLockedHistoryStore<'store> {
    store: &'store HistoryStore,
    // Held for RAII lock semantics; the lock is released when this struct is dropped.
    #[expect(dead_code)]
    locked_file: DebugIgnore<File>,
}

impl ExclusiveLockedHistoryStore<'_> {
    /// Loads the full history.
    ///
    /// Quarantine data saved through the returned index is written while this
    /// lock is held, as long as the index does not outlive it.
    pub fn load(&self, consumer_configured: bool) -> Result<RunHistoryIndex, HistoryStoreError> {
        self.store.load_unlocked(consumer_configured)
    }

    /// Records a new run at the end of the history.
    ///
    /// The run's results are written before the run list. If either write
    /// fails, the run's directory is removed again.
    pub fn record_run(
        &mut self,
        status: RunStatus,
        results: Option<RunResults>,
    ) -> Result<RunId, HistoryStoreError> {
        self.record_run_with(status, results, |path, list| write_json(path, list))
    }

    // A custom list writer can be passed in while testing.
    fn record_run_with(
        &mut self,
        status: RunStatus,
        results: Option<RunResults>,
        write_list: impl FnOnce(&Utf8Path, &RunList) -> Result<(), atomicwrites::Error<io::Error>>,
    ) -> Result<RunId, HistoryStoreError> {
        let mut index = self.store.load_unlocked(false)?;
        let run_id = index.record_run(status, results);
        let run_dir = self.store.run_dir(run_id);

        if let Some(results) = index.results_of(run_id) {
            std::fs::create_dir_all(&run_dir).map_err(|error| HistoryStoreError::DirCreate {
                dir: run_dir.clone(),
                error,
            })?;
            let path = run_dir.join(RESULTS_JSON_FILE_NAME);
            if let Err(error) = write_json(&path, results) {
                remove_run_dir(&run_dir);
                return Err(HistoryStoreError::Write { path, error });
            }
        }

        let list = RunList {
            format_version: RUN_LIST_FORMAT_VERSION,
            runs: index.runs().map(|run| run.info().clone()).collect(),
        };
        let path = self.store.store_dir.join(RUNS_JSON_FILE_NAME);
        if let Err(error) = write_list(&path, &list) {
            remove_run_dir(&run_dir);
            return Err(HistoryStoreError::Write { path, error });
        }

        debug!("recorded run {run_id} ({status:?})");
        Ok(run_id)
    }
}

fn remove_run_dir(run_dir: &Utf8Path) {
    if let Err(error) = std::fs::remove_dir_all(run_dir)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!("failed to remove run directory {run_dir}: {error}");
    }
}

#[derive(Clone, Copy, Debug)]
enum LockKind {
    Shared,
    Exclusive,
}

/// Acquires a file lock, retrying until a timeout.
///
/// Non-blocking attempts are used so that filesystems where locking never
/// succeeds produce an error instead of hanging.
fn acquire_lock_with_retry(
    file: &File,
    lock_file_path: &Utf8Path,
    kind: LockKind,
) -> Result<(), HistoryStoreError> {
    const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
    const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

    let start = Instant::now();
    loop {
        let result = match kind {
            LockKind::Shared => file.try_lock_shared(),
            LockKind::Exclusive => file.try_lock(),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(TryLockError::WouldBlock) => {
                if start.elapsed() >= LOCK_TIMEOUT {
                    return Err(HistoryStoreError::FileLockTimeout {
                        path: lock_file_path.to_owned(),
                        timeout_secs: LOCK_TIMEOUT.as_secs(),
                    });
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(TryLockError::Error(error)) => {
                return Err(HistoryStoreError::FileLock {
                    path: lock_file_path.to_owned(),
                    error,
                });
            }
        }
    }
}

fn read_json_if_exists<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, HistoryStoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(HistoryStoreError::Read {
                path: path.to_owned(),
                error,
            });
        }
    };

    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|error| HistoryStoreError::Deserialize {
            path: path.to_owned(),
            error,
        })
}

fn write_json<T: Serialize>(
    path: &Utf8Path,
    value: &T,
) -> Result<(), atomicwrites::Error<io::Error>> {
    atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite).write(|file| {
        serde_json::to_writer_pretty(file, value)?;
        Ok(())
    })
}
