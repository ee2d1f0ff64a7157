//! `sunlight ingest` command - append raw readings from a payload file.
//!
//! Accepts what sensors post (a JSON array or a single object) and JSON
//! Lines files. Items without a parseable timestamp are reported and
//! skipped. Everything else is stored as given; the downsampler decides
//! what is malformed.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use sunlight_downsample::{parse_payload, DownsampleError, RawReadingSink};
use tracing::info;

use crate::cli::context::Settings;
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_fields, print_heading};

/// Arguments for the `ingest` command
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Payload file (JSON array, JSON object or JSON Lines)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct SkippedOutput {
    index: usize,
    reason: String,
}

#[derive(Debug, Serialize)]
struct IngestOutput {
    file: String,
    appended: u64,
    skipped: Vec<SkippedOutput>,
}

pub fn run(args: IngestArgs, settings: &Settings) -> Result<()> {
    if !args.file.exists() {
        return Err(HelpfulError::file_not_found(&args.file).into());
    }
    let content = std::fs::read_to_string(&args.file)
        .map_err(|e| HelpfulError::cannot_read_file(&args.file, &e.to_string()))?;
    let parsed = parse_payload(&content)
        .map_err(|e| HelpfulError::payload_parse_error(&args.file, &e.to_string()))?;

    let warehouse = settings.open_warehouse()?;
    let appended = warehouse
        .append_raw(&parsed.records)
        .map_err(DownsampleError::from)?;
    info!(
        file = %args.file.display(),
        appended,
        skipped = parsed.skipped.len(),
        "Ingested raw readings"
    );

    let output = IngestOutput {
        file: args.file.display().to_string(),
        appended,
        skipped: parsed
            .skipped
            .into_iter()
            .map(|item| SkippedOutput {
                index: item.index,
                reason: item.reason,
            })
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_heading("Ingest");
    print_fields(&[
        ("File", output.file.clone()),
        ("Appended", output.appended.to_string()),
        ("Skipped", output.skipped.len().to_string()),
    ]);
    for item in &output.skipped {
        println!("  item {}: {}", item.index, item.reason);
    }
    Ok(())
}
