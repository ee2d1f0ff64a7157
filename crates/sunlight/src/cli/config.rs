//! `sunlight config` command - resolved configuration and paths.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::cli::context::Settings;
use crate::cli::output::{print_fields, print_heading};

/// Arguments for the `config` command
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ConfigArgs, settings: &Settings) -> Result<()> {
    let downsample = &settings.config.downsample;
    let lock_path = sunlight_downsample::lock::run_lock_path(settings.warehouse_path());
    let log_dir = settings.log_dir();

    if args.json {
        let output = json!({
            "config_file": settings.config_path.display().to_string(),
            "config_file_found": settings.config_found,
            "warehouse": settings.warehouse_path().display().to_string(),
            "warehouse_exists": settings.warehouse_path().exists(),
            "run_lock": lock_path.display().to_string(),
            "logs_dir": log_dir.display().to_string(),
            "downsample": downsample,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_heading("Sunlight Configuration");
    let config_file = if settings.config_found {
        settings.config_path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", settings.config_path.display())
    };
    let warehouse = if settings.warehouse_path().exists() {
        settings.warehouse_path().display().to_string()
    } else {
        format!("{} (created on first use)", settings.warehouse_path().display())
    };
    print_fields(&[
        ("Config file", config_file),
        ("Warehouse", warehouse),
        ("Run lock", lock_path.display().to_string()),
        ("Logs", log_dir.display().to_string()),
        (
            "Max span",
            format!(
                "{} minutes ({:.1} days)",
                downsample.max_span_minutes,
                f64::from(downsample.max_span_minutes) / (24.0 * 60.0)
            ),
        ),
        ("Aggregation", downsample.aggregation.to_string()),
        ("Merge batch", format!("{} rows", downsample.merge_batch_rows)),
    ]);
    Ok(())
}
