// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and command execution.

use crate::output::{OutputContext, OutputOpts, StdoutStyles};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use owo_colors::OwoColorize;
use quarantine_runner::{
    config::{DefaultConfigWarnings, PipelineConfig},
    errors::{PropagateError, QuarantineActionError},
    history::{HistoryRun, RunHistory, RunHistoryIndex, RunId, RunIdSelector, RunStatus},
    quarantine::{QuarantineData, QuarantineRecord, QuarantineState, QuarantineView},
    results::{RunResults, TestId, TestObject},
    store::{ExclusiveLockedHistoryStore, HistoryStore},
};
use std::io::Write;
use swrite::{SWrite, swrite, swriteln};
use tracing::{debug, info, warn};

/// Records test runs and carries test quarantines forward between them.
#[derive(Debug, Parser)]
#[command(
    version,
    name = "quarantine",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct QuarantineApp {
    #[command(flatten)]
    common: CommonOpts,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Directory holding the run history
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = "QUARANTINE_STORE_DIR",
        default_value = ".quarantine"
    )]
    store_dir: Utf8PathBuf,

    /// Config file [default: <store-dir>/.config/quarantine.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<Utf8PathBuf>,
}

impl CommonOpts {
    fn make_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::from_sources(
            &self.store_dir,
            self.config.as_deref(),
            &mut DefaultConfigWarnings,
        )
        .wrap_err("failed to read pipeline configuration")
    }

    fn open_store(&self) -> Result<HistoryStore> {
        HistoryStore::new(&self.store_dir)
            .wrap_err_with(|| format!("failed to open history store at `{}`", self.store_dir))
    }

    fn load_history(&self, config: &PipelineConfig) -> Result<RunHistoryIndex> {
        self.open_store()?
            .load(config.is_quarantine_consumer_configured())
            .wrap_err("failed to load run history")
    }
}

/// Loads the history for a command that writes to it.
///
/// The returned index saves through `locked`, so it must not outlive it.
fn load_history_locked(
    locked: &ExclusiveLockedHistoryStore<'_>,
    config: &PipelineConfig,
) -> Result<RunHistoryIndex> {
    locked
        .load(config.is_quarantine_consumer_configured())
        .wrap_err("failed to load run history")
}

fn lock_store(store: &HistoryStore) -> Result<ExclusiveLockedHistoryStore<'_>> {
    store
        .lock_exclusive()
        .wrap_err_with(|| format!("failed to lock history store at `{}`", store.store_dir()))
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record a run's test results at the end of the history
    ///
    /// The results file is JSON in the same format the store writes to
    /// `runs/<run-id>/results.json`. The new run's ID is printed to stdout.
    Record {
        /// Path to the run's aggregated test results
        #[arg(long, value_name = "PATH")]
        results: Option<Utf8PathBuf>,

        /// Mark the run as incomplete
        ///
        /// Incomplete runs are never used as a source of quarantine state.
        #[arg(long)]
        incomplete: bool,
    },

    /// Compute a run's quarantine data from its history and save it
    Propagate {
        /// The run to propagate to (`latest` or a run ID prefix)
        #[arg(long, value_name = "ID", default_value = "latest")]
        run: RunIdSelector,
    },

    /// Show quarantine records for a run
    Show {
        /// The run to show (`latest` or a run ID prefix)
        #[arg(long, value_name = "ID", default_value = "latest")]
        run: RunIdSelector,

        /// Only show the record for this test
        #[arg(long, value_name = "TEST-ID")]
        test: Option<String>,
    },

    /// Quarantine a test in the latest completed run
    Quarantine {
        #[command(flatten)]
        target: ActionTarget,

        /// Why the test is being quarantined
        #[arg(long)]
        reason: String,
    },

    /// Release a test from quarantine in the latest completed run
    Release {
        #[command(flatten)]
        target: ActionTarget,
    },
}

#[derive(Debug, Args)]
struct ActionTarget {
    /// The test to act on, as `suite::case`
    #[arg(long, value_name = "TEST-ID")]
    test: String,

    /// The user performing the action
    #[arg(long, value_name = "NAME", env = "QUARANTINE_USER")]
    user: String,

    /// The run to act on; must be the latest completed run
    #[arg(long, value_name = "ID", default_value = "latest")]
    run: RunIdSelector,
}

#[derive(Debug)]
enum HumanAction {
    Quarantine { reason: String },
    Release,
}

impl QuarantineApp {
    /// Initializes logging and returns the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the command, writing its report to `out`.
    pub fn exec(self, output: OutputContext, out: &mut dyn Write) -> Result<()> {
        let styles = output.stdout_styles();
        let report = match self.command {
            Command::Record {
                results,
                incomplete,
            } => exec_record(&self.common, results.as_deref(), incomplete, &styles)?,
            Command::Propagate { run } => exec_propagate(&self.common, &run, &styles)?,
            Command::Show { run, test } => {
                exec_show(&self.common, &run, test.map(TestId::new).as_ref(), &styles)?
            }
            Command::Quarantine { target, reason } => {
                exec_action(&self.common, &target, HumanAction::Quarantine { reason }, &styles)?
            }
            Command::Release { target } => {
                exec_action(&self.common, &target, HumanAction::Release, &styles)?
            }
        };

        out.write_all(report.as_bytes())
            .and_then(|()| out.flush())
            .wrap_err("failed to write report to stdout")
    }
}

fn exec_record(
    common: &CommonOpts,
    results_path: Option<&Utf8Path>,
    incomplete: bool,
    styles: &StdoutStyles,
) -> Result<String> {
    let results = results_path.map(read_results).transpose()?;
    let status = if incomplete {
        RunStatus::Incomplete
    } else {
        RunStatus::Completed
    };

    let store = common.open_store()?;
    let run_id = store
        .record_run(status, results)
        .wrap_err("failed to record run")?;
    info!("recorded run {run_id}");

    let mut report = String::new();
    swriteln!(report, "{}", run_id.style(styles.run_id));
    Ok(report)
}

fn read_results(path: &Utf8Path) -> Result<RunResults> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read test results from `{path}`"))?;
    let results: RunResults = serde_json::from_str(&contents)
        .wrap_err_with(|| format!("failed to parse test results in `{path}`"))?;
    debug!("read {} test cases from {path}", results.case_count());
    Ok(results)
}

fn exec_propagate(
    common: &CommonOpts,
    selector: &RunIdSelector,
    styles: &StdoutStyles,
) -> Result<String> {
    let config = common.make_config()?;
    let store = common.open_store()?;
    let locked = lock_store(&store)?;
    let mut history = load_history_locked(&locked, &config)?;
    let run_id = history.resolve(selector)?;

    let computed = match history.propagate(run_id, &config.propagation_options()) {
        Ok(run) => {
            attached_view(run)?
                .save()
                .wrap_err_with(|| format!("failed to save quarantine data for run {run_id}"))?;
            true
        }
        Err(PropagateError::AlreadyPropagated { .. }) => {
            info!("quarantine data for run {run_id} has already been computed, leaving it unchanged");
            false
        }
        Err(error) => return Err(error.into()),
    };

    let data = history
        .quarantine_of(run_id)
        .ok_or_else(|| eyre!("quarantine data for run {run_id} was not attached"))?;
    let quarantined = data.records().filter(|record| record.is_quarantined()).count();

    let mut report = String::new();
    if !computed {
        swriteln!(
            report,
            "run {}: {}",
            run_id.style(styles.run_id),
            "quarantine data already computed, left unchanged".style(styles.dimmed),
        );
    }
    swriteln!(
        report,
        "run {}: {} inherited records, {} quarantined",
        run_id.style(styles.run_id),
        data.len(),
        quarantined,
    );
    Ok(report)
}

fn exec_show(
    common: &CommonOpts,
    selector: &RunIdSelector,
    test: Option<&TestId>,
    styles: &StdoutStyles,
) -> Result<String> {
    let config = common.make_config()?;
    let history = common.load_history(&config)?;
    let run_id = history.resolve(selector)?;
    let run = history
        .run(run_id)
        .ok_or_else(|| eyre!("run {run_id} is not in the history"))?;

    let mut report = String::new();
    swriteln!(report, "run {}", run_id.style(styles.run_id));

    let Some(results) = run.recorded().results() else {
        swriteln!(report, "  {}", "(no test results)".style(styles.dimmed));
        return Ok(report);
    };
    let view = run.quarantine_view().ok_or_else(|| {
        eyre!("quarantine data for run {run_id} has not been computed (run `quarantine propagate`)")
    })?;
    if !history.is_quarantine_consumer_configured() {
        warn!(
            "pipeline `{}` has no quarantine-aware consumer configured, \
             so no quarantine records are shown",
            config.name()
        );
        return Ok(report);
    }

    let objects: Vec<TestObject<'_>> = match test {
        Some(test_id) => vec![
            view.result_for_test_id(test_id)
                .ok_or_else(|| eyre!("test `{test_id}` is not part of run {run_id}"))?,
        ],
        None => results.cases().map(TestObject::Case).collect(),
    };

    for object in objects {
        match view.records_for(object) {
            Some(record) => write_record(&mut report, &record, styles),
            None => {
                swriteln!(
                    report,
                    "  {}: {}",
                    object.id().style(styles.test_id),
                    "(suite)".style(styles.dimmed),
                );
            }
        }
    }
    Ok(report)
}

fn write_record(report: &mut String, record: &QuarantineRecord, styles: &StdoutStyles) {
    swrite!(report, "  {}: ", record.test_id().style(styles.test_id));
    match record.state() {
        QuarantineState::NotQuarantined => {
            swrite!(report, "{}", "not quarantined".style(styles.dimmed));
        }
        QuarantineState::Quarantined(provenance) => {
            swrite!(
                report,
                "{} by {} at {}: {}",
                "quarantined".style(styles.quarantined),
                provenance.quarantined_by,
                format_time(provenance.quarantined_at),
                provenance.reason,
            );
        }
        QuarantineState::Released(info) => {
            swrite!(
                report,
                "{} by {} at {}",
                "released".style(styles.released),
                info.released_by,
                format_time(info.released_at),
            );
        }
    }
    report.push('\n');
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn exec_action(
    common: &CommonOpts,
    target: &ActionTarget,
    action: HumanAction,
    styles: &StdoutStyles,
) -> Result<String> {
    let config = common.make_config()?;
    let store = common.open_store()?;
    let locked = lock_store(&store)?;
    let mut history = load_history_locked(&locked, &config)?;
    let run_id = history.resolve(&target.run)?;
    let test_id = TestId::new(target.test.as_str());

    let run = history
        .run(run_id)
        .ok_or_else(|| eyre!("run {run_id} is not in the history"))?;
    let data = apply_action(
        run,
        history.latest_completed_run(),
        &test_id,
        &target.user,
        action,
    )?;
    let record = data
        .get(&test_id)
        .cloned()
        .ok_or_else(|| eyre!("record for `{test_id}` was not stored"))?;

    history
        .attach_quarantine(data)
        .map_err(|_| eyre!("run {run_id} is not in the history"))?;
    let run = history
        .run(run_id)
        .ok_or_else(|| eyre!("run {run_id} is not in the history"))?;
    attached_view(run)?
        .save()
        .wrap_err_with(|| format!("failed to save quarantine data for run {run_id}"))?;

    let mut report = String::new();
    swriteln!(report, "run {}", run_id.style(styles.run_id));
    write_record(&mut report, &record, styles);
    Ok(report)
}

/// Applies a human action to a copy of the run's quarantine data.
fn apply_action(
    run: HistoryRun<'_>,
    latest: Option<RunId>,
    test_id: &TestId,
    user: &str,
    action: HumanAction,
) -> Result<QuarantineData, QuarantineActionError> {
    let run_id = run.recorded().run_id();
    let mut data = run
        .recorded()
        .quarantine()
        .cloned()
        .unwrap_or_else(|| QuarantineData::new(run_id));

    if !data.view(run).is_latest_result() {
        return Err(QuarantineActionError::StaleRun { run_id, latest });
    }
    let results = run
        .recorded()
        .results()
        .ok_or(QuarantineActionError::NoResults { run_id })?;

    let now = Utc::now();
    match action {
        HumanAction::Quarantine { reason } => {
            data.quarantine(results, test_id, user, reason, now)?;
        }
        HumanAction::Release => {
            data.release(results, test_id, user, now)?;
        }
    }
    Ok(data)
}

fn attached_view(run: HistoryRun<'_>) -> Result<QuarantineView<'_, HistoryRun<'_>>> {
    let run_id = run.recorded().run_id();
    run.quarantine_view()
        .ok_or_else(|| eyre!("quarantine data for run {run_id} was not attached"))
}
