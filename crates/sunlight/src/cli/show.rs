//! `sunlight show` command - newest downsampled rows.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use sunlight_downsample::{DownsampleError, DownsampledPoint};

use crate::cli::context::Settings;
use crate::cli::output::{format_instant, format_intensity, format_minute, print_table};

/// Arguments for the `show` command
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Only rows for this sensor
    #[arg(long)]
    pub sensor: Option<String>,

    /// Maximum number of rows
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PointOutput<'a> {
    observation_minute: String,
    sensor_id: &'a str,
    sensor_set_id: &'a str,
    smoothed_light_intensity: f64,
    last_updated: String,
}

impl<'a> From<&'a DownsampledPoint> for PointOutput<'a> {
    fn from(point: &'a DownsampledPoint) -> Self {
        Self {
            observation_minute: point.observation_minute.to_rfc3339(),
            sensor_id: &point.sensor_id,
            sensor_set_id: &point.sensor_set_id,
            smoothed_light_intensity: point.smoothed_light_intensity,
            last_updated: point.last_updated.to_rfc3339(),
        }
    }
}

pub fn run(args: ShowArgs, settings: &Settings) -> Result<()> {
    let warehouse = settings.open_warehouse()?;
    let points = warehouse
        .recent_points(args.sensor.as_deref(), args.limit)
        .map_err(DownsampleError::from)?;

    if args.json {
        let output: Vec<PointOutput<'_>> = points.iter().map(PointOutput::from).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if points.is_empty() {
        match &args.sensor {
            Some(sensor) => println!("No downsampled rows for sensor {}", sensor),
            None => println!("No downsampled rows yet. Try: sunlight run"),
        }
        return Ok(());
    }

    let rows = points
        .iter()
        .map(|p| {
            vec![
                format_minute(p.observation_minute),
                p.sensor_id.clone(),
                p.sensor_set_id.clone(),
                format_intensity(p.smoothed_light_intensity),
                format_instant(p.last_updated),
            ]
        })
        .collect();
    print_table(
        &["Minute", "Sensor", "Sensor set", "Intensity", "Last updated"],
        rows,
    );
    Ok(())
}
