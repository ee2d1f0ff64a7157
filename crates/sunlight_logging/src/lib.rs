//! Shared logging utilities for Sunlight binaries.
//!
//! Events go to two places: a daily rolling file under the configured log
//! directory (plain text, non-blocking) and stderr. Stdout is left alone so
//! `--json` output stays machine-readable.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "sunlight=info,sunlight_downsample=info";
const VERBOSE_LOG_FILTER: &str = "sunlight=debug,sunlight_downsample=debug";
const MAX_LOG_FILES: usize = 14;

/// Logging configuration shared by Sunlight binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Keep stderr to warnings and errors, e.g. when printing JSON.
    pub quiet: bool,
    /// `None` disables the file layer.
    pub log_dir: Option<&'a Path>,
}

/// Keeps the background file writer alive; drop it last to flush.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    log_file_prefix: Option<PathBuf>,
}

impl LogGuard {
    /// Directory and file prefix of the rolling log, if file logging is on.
    pub fn log_file_prefix(&self) -> Option<&Path> {
        self.log_file_prefix.as_deref()
    }
}

/// Initialize tracing with a rolling file writer and stderr output.
///
/// A log directory that cannot be created only disables the file layer.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let file_filter = env_filter(false);
    let console_filter = if config.quiet {
        EnvFilter::new("warn")
    } else {
        env_filter(config.verbose)
    };

    let (file_layer, guard, prefix) = match config.log_dir {
        Some(dir) => match file_appender(dir, config.app_name) {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(file_filter);
                (
                    Some(layer),
                    Some(guard),
                    Some(dir.join(sanitize_name(config.app_name))),
                )
            }
            Err(err) => {
                eprintln!("Warning: file logging disabled: {err:#}");
                (None, None, None)
            }
        },
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard {
        _file: guard,
        log_file_prefix: prefix,
    })
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_LOG_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn file_appender(dir: &Path, app_name: &str) -> Result<RollingFileAppender> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(sanitize_name(app_name))
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
