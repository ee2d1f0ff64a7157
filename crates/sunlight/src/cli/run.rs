//! `sunlight run` command - process the next window of raw readings.
//!
//! Meant to be invoked by a scheduler. Exits 0 when the window was written
//! or there was nothing to do, 75 when another run holds the warehouse or
//! the store is busy, and 1 otherwise.
//!
//! # Usage
//!
//! ```bash
//! sunlight run
//! sunlight run --dry-run --json
//! sunlight run --catch-up
//! ```

use anyhow::Result;
use clap::Args;
use sunlight_downsample::{DownsampleError, DownsampleJob, LockError, RunLock, RunReport};
use tracing::info;

use crate::cli::context::Settings;
use crate::cli::error::HelpfulError;
use crate::cli::output::{format_minute, print_fields, print_heading, print_table};

/// Arguments for the `run` command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Compute the window against the warehouse but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Keep processing windows until the backlog is drained
    #[arg(long)]
    pub catch_up: bool,

    /// Upper bound on windows processed by --catch-up
    #[arg(long, default_value_t = 1_000)]
    pub max_runs: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: RunArgs, settings: &Settings) -> Result<()> {
    let _lock = acquire_lock(settings)?;
    let warehouse = settings.open_warehouse()?;
    let job = DownsampleJob::new(&warehouse, &warehouse, &settings.config.downsample)?
        .dry_run(args.dry_run);

    if !args.catch_up {
        let report = job.run()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        return Ok(());
    }

    let reports = job.catch_up(args.max_runs.max(1))?;
    let windows = reports.iter().filter(|r| !r.is_idle()).count();
    info!(windows, "Catch-up finished");
    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_catch_up(&reports);
    }
    Ok(())
}

fn acquire_lock(settings: &Settings) -> Result<RunLock> {
    match RunLock::try_acquire(settings.warehouse_path()) {
        Ok(lock) => Ok(lock),
        Err(err) => {
            let helpful = match &err {
                LockError::Locked { path, holder } => HelpfulError::run_locked(path, holder.as_ref()),
                _ => HelpfulError::new("Failed to acquire the run lock").with_context(format!(
                    "Warehouse: {}",
                    settings.warehouse_path().display()
                )),
            };
            Err(anyhow::Error::new(DownsampleError::from(err)).context(helpful))
        }
    }
}

fn print_report(report: &RunReport) {
    let title = if report.dry_run {
        "Downsample run (dry run)"
    } else {
        "Downsample run"
    };
    print_heading(title);

    let Some(window) = report.window else {
        let reason = report
            .idle_reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "nothing to do".to_string());
        println!("Nothing to do: {}", reason);
        return;
    };

    print_fields(&[
        ("Window", window.to_string()),
        ("Minutes", window.minute_count().to_string()),
        (
            "Sensors",
            format!("{} ({} seeded from earlier windows)", report.sensors, report.seeded_sensors),
        ),
        (
            "Raw rows",
            format!("{} scanned, {} malformed skipped", report.raw_rows_scanned, report.malformed_rows),
        ),
        ("Grid cells", report.scaffold_cells.to_string()),
        (
            "Emitted",
            format!("{} real, {} filled", report.real_points, report.filled_points),
        ),
        (
            if report.dry_run { "Would write" } else { "Written" },
            format!(
                "{} inserted, {} updated, {} unchanged",
                report.inserted, report.updated, report.unchanged
            ),
        ),
        ("Duration", format!("{} ms", report.duration_ms)),
    ]);
}

fn print_catch_up(reports: &[RunReport]) {
    let rows: Vec<Vec<String>> = reports
        .iter()
        .filter_map(|report| {
            report.window.map(|window| {
                vec![
                    format_minute(window.start()),
                    format_minute(window.last_minute()),
                    report.sensors.to_string(),
                    report.real_points.to_string(),
                    report.filled_points.to_string(),
                    report.inserted.to_string(),
                    report.updated.to_string(),
                    report.unchanged.to_string(),
                ]
            })
        })
        .collect();

    if rows.is_empty() {
        if let Some(report) = reports.first() {
            print_report(report);
        }
        return;
    }
    print_table(
        &[
            "From", "Through", "Sensors", "Real", "Filled", "Inserted", "Updated", "Unchanged",
        ],
        rows,
    );
    let windows = reports.iter().filter(|r| !r.is_idle()).count();
    let written: usize = reports.iter().map(RunReport::rows_written).sum();
    println!("{} window(s), {} row(s) written", windows, written);
}
