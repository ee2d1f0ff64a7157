//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

use sunlight_downsample::lock::LockHolder;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// File does not exist
    pub fn file_not_found(path: &Path) -> Self {
        Self::new(format!("File not found: {}", path.display()))
            .with_context("The specified file does not exist")
            .with_suggestions([
                format!("TRY: Check if the file exists: ls -la {}", path.display()),
                format!(
                    "TRY: Look for similar files: ls {}",
                    path.parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| ".".to_string())
                ),
            ])
    }

    /// File cannot be read (permission or encoding error)
    pub fn cannot_read_file(path: &Path, reason: &str) -> Self {
        Self::new(format!("Cannot read file: {}", path.display()))
            .with_context(reason.to_string())
            .with_suggestions([
                format!("TRY: Check file permissions: ls -la {}", path.display()),
                "TRY: Payload files must be UTF-8 JSON or JSON Lines".to_string(),
            ])
    }

    /// Payload could not be parsed into readings
    pub fn payload_parse_error(path: &Path, details: &str) -> Self {
        Self::new(format!("Payload parse error: {}", details))
            .with_context(format!("Failed to read readings from: {}", path.display()))
            .with_suggestions([
                "TRY: Send a JSON array of readings, a single reading object, or JSON Lines"
                    .to_string(),
                "TRY: Each reading needs sensor_id, sensor_set_id, timestamp (RFC 3339) and light_intensity".to_string(),
                "TRY: Generate a valid sample: sunlight generate --sensors 2".to_string(),
            ])
    }

    /// Another `sunlight run` holds the warehouse
    pub fn run_locked(lock_path: &Path, holder: Option<&LockHolder>) -> Self {
        let context = match holder {
            Some(holder) => format!(
                "Held by pid {} ({}) since {}",
                holder.pid,
                holder.exe.as_deref().unwrap_or("unknown executable"),
                holder.started_at.to_rfc3339()
            ),
            None => format!("Lock file: {}", lock_path.display()),
        };
        Self::new("Another downsampling run is in progress")
            .with_context(context)
            .with_suggestions([
                "TRY: Wait for the other run to finish; the next scheduled run resumes where it stopped".to_string(),
                format!(
                    "TRY: If no run is active, check the lock file: ls -la {}",
                    lock_path.display()
                ),
            ])
    }

    /// Config file exists but could not be loaded
    pub fn invalid_config(path: &Path, details: &str) -> Self {
        Self::new(format!("Invalid configuration: {}", details))
            .with_context(format!("Config file: {}", path.display()))
            .with_suggestions([
                "TRY: Show the resolved configuration: sunlight config".to_string(),
                "TRY: max_span_minutes must be at least 2 and merge_batch_rows greater than zero"
                    .to_string(),
                format!("TRY: Remove the file to fall back to defaults: rm {}", path.display()),
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}
