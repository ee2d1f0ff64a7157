//! `sunlight generate` command - synthetic sensor data.
//!
//! One reading per sensor per minute over a UTC day. Intensity is a two-hour
//! sine wave, each sensor shifted by a quarter period, under a bell curve
//! peaking at noon, so values run from 10 lux near midnight up to 10 000 lux
//! around midday. Timestamps sit at second 30 of their minute with up to
//! five seconds of seeded jitter, so every reading stays in its minute and
//! the same arguments always produce the same file.
//!
//! # Usage
//!
//! ```bash
//! sunlight generate --sensors 4 --date 2024-03-01 --output day.jsonl
//! sunlight ingest day.jsonl
//! ```

use std::f64::consts::PI;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use clap::Args;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::info;

const MIN_LUX: f64 = 10.0;
const MAX_LUX: f64 = 10_000.0;
const PERIOD_MINUTES: f64 = 120.0;
const PEAK_MINUTE: f64 = 720.0;
const BELL_STD_DEV_MINUTES: f64 = 300.0;
const MINUTES_PER_DAY: i64 = 24 * 60;
const BASE_SECOND: i64 = 30;
const MAX_JITTER_SECONDS: i64 = 5;

/// Arguments for the `generate` command
#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Number of sensors
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=10_000))]
    pub sensors: u16,

    /// UTC day to generate (YYYY-MM-DD); defaults to yesterday
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Sensor set every reading belongs to
    #[arg(long, default_value = "test_set")]
    pub sensor_set: String,

    /// Sensor id prefix; ids are `<prefix>_<index>`
    #[arg(long, default_value = "test_sensor")]
    pub prefix: String,

    /// Jitter seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Write JSON Lines here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SyntheticReading {
    sensor_id: String,
    sensor_set_id: String,
    timestamp: String,
    light_intensity: f64,
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let date = args
        .date
        .unwrap_or_else(|| (Utc::now() - Duration::days(1)).date_naive());
    let readings = generate(&args, date);

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_jsonl(BufWriter::new(file), &readings)?;
            info!(
                path = %path.display(),
                readings = readings.len(),
                %date,
                "Wrote synthetic readings"
            );
            eprintln!("Wrote {} readings to {}", readings.len(), path.display());
        }
        None => write_jsonl(io::stdout().lock(), &readings)?,
    }
    Ok(())
}

fn generate(args: &GenerateArgs, date: NaiveDate) -> Vec<SyntheticReading> {
    let midnight = date.and_time(chrono::NaiveTime::MIN).and_utc();
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut readings = Vec::with_capacity(usize::from(args.sensors) * MINUTES_PER_DAY as usize);

    for sensor in 0..args.sensors {
        let sensor_id = format!("{}_{}", args.prefix, sensor);
        let phase = f64::from(sensor) * PI / 2.0;
        for minute in 0..MINUTES_PER_DAY {
            let jitter = rng.gen_range(-MAX_JITTER_SECONDS..=MAX_JITTER_SECONDS);
            let timestamp: DateTime<Utc> = midnight
                + Duration::minutes(minute)
                + Duration::seconds(BASE_SECOND + jitter);
            readings.push(SyntheticReading {
                sensor_id: sensor_id.clone(),
                sensor_set_id: args.sensor_set.clone(),
                timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                light_intensity: intensity(minute, phase),
            });
        }
    }
    readings
}

fn intensity(minute: i64, phase: f64) -> f64 {
    let minute = minute as f64;
    let radians = 2.0 * PI * minute / PERIOD_MINUTES + phase;
    let normalized = (radians.sin() + 1.0) / 2.0;
    let bell = (-(minute - PEAK_MINUTE).powi(2) / (2.0 * BELL_STD_DEV_MINUTES.powi(2))).exp();
    MIN_LUX + normalized * bell * (MAX_LUX - MIN_LUX)
}

fn write_jsonl<W: Write>(mut writer: W, readings: &[SyntheticReading]) -> Result<()> {
    for reading in readings {
        serde_json::to_writer(&mut writer, reading)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
