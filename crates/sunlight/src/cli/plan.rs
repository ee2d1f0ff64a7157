//! `sunlight plan` command - show the window the next run would process.
//!
//! Read-only. Does not take the run lock.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use sunlight_downsample::{DownsampleError, WarehouseSummary, WindowPlan, WindowPlanner};

use crate::cli::context::Settings;
use crate::cli::output::{format_minute, format_optional, print_fields, print_heading};

/// Arguments for the `plan` command
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    warehouse: String,
    max_span_minutes: u32,
    plan: WindowPlan,
    summary: WarehouseSummary,
}

pub fn run(args: PlanArgs, settings: &Settings) -> Result<()> {
    let warehouse = settings.open_warehouse()?;
    let downsample = &settings.config.downsample;
    let plan = WindowPlanner::new(downsample.max_span())
        .plan(&warehouse, &warehouse)
        .map_err(DownsampleError::from)?;
    let summary = warehouse.summary().map_err(DownsampleError::from)?;

    let output = PlanOutput {
        warehouse: settings.warehouse_path().display().to_string(),
        max_span_minutes: downsample.max_span_minutes,
        plan,
        summary,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_heading("Next downsample window");
    match &output.plan {
        WindowPlan::Ready { window } => print_fields(&[
            ("Window", window.to_string()),
            ("First minute", format_minute(window.start())),
            ("Last minute", format_minute(window.last_minute())),
            ("Minutes", window.minute_count().to_string()),
        ]),
        WindowPlan::Idle { reason } => println!("Nothing to do: {}", reason),
    }

    println!();
    print_heading("Warehouse");
    let summary = &output.summary;
    print_fields(&[
        ("Path", output.warehouse.clone()),
        ("Max span", format!("{} minutes", output.max_span_minutes)),
        ("Raw rows", summary.raw_rows.to_string()),
        (
            "Earliest raw",
            format_optional(summary.raw_bounds.as_ref().map(|b| b.earliest)),
        ),
        (
            "Latest raw",
            format_optional(summary.raw_bounds.as_ref().map(|b| b.latest)),
        ),
        (
            "Downsampled",
            format!(
                "{} rows across {} sensors",
                summary.downsampled_rows, summary.downsampled_sensors
            ),
        ),
        ("Newest minute", format_optional(summary.max_observation_minute)),
    ]);
    Ok(())
}
