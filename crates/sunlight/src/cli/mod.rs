//! CLI module for Sunlight
//!
//! Each subcommand lives in its own module with an `Args` struct and a
//! `run` entry point. Shared pieces: path resolution (`context`), helpful
//! errors and table output.

pub mod context;
pub mod error;
pub mod output;

pub mod config;
pub mod generate;
pub mod ingest;
pub mod plan;
pub mod run;
pub mod show;

use sunlight_downsample::DownsampleError;

use crate::cli::error::HelpfulError;

/// Exit status for failures a scheduler should retry (EX_TEMPFAIL).
pub const EXIT_TEMPFAIL: u8 = 75;
pub const EXIT_FAILURE: u8 = 1;

/// Whether any error in the chain is one a later retry could clear.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(err) = err.downcast_ref::<DownsampleError>() {
        return err.is_transient();
    }
    err.chain().any(|cause| {
        cause
            .downcast_ref::<DownsampleError>()
            .is_some_and(DownsampleError::is_transient)
    })
}

pub fn exit_code(err: &anyhow::Error) -> u8 {
    if is_transient(err) {
        EXIT_TEMPFAIL
    } else {
        EXIT_FAILURE
    }
}

/// Print an error as a JSON document on stdout, for `--json` callers.
pub fn print_json_error(err: &anyhow::Error) {
    let payload = json_error(err);
    match serde_json::to_string_pretty(&payload) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", payload),
    }
}

fn json_error(err: &anyhow::Error) -> serde_json::Value {
    let causes: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
    match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": {
                "message": helpful.message,
                "context": helpful.context,
                "suggestions": helpful.suggestions,
                "causes": causes,
                "transient": is_transient(err),
            }
        }),
        None => serde_json::json!({
            "error": {
                "message": err.to_string(),
                "causes": causes,
                "transient": is_transient(err),
            }
        }),
    }
}
