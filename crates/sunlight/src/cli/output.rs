//! Output formatting utilities for CLI commands

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Minute-resolution UTC timestamp, e.g. `2024-03-01 10:05`.
pub fn format_minute(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// Second-resolution UTC timestamp for raw readings and write times.
pub fn format_instant(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub fn format_optional(ts: Option<DateTime<Utc>>) -> String {
    ts.map(format_instant).unwrap_or_else(|| "-".to_string())
}

/// Light intensity with two decimals; NaN never reaches the store.
pub fn format_intensity(value: f64) -> String {
    format!("{:.2}", value)
}

/// Print a table with a cyan header row
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    println!("{}", build_table(headers, rows));
}

fn build_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }
    table
}

/// Print `label: value` pairs with the values aligned.
pub fn print_fields(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in fields {
        println!("  {:<width$}  {}", format!("{}:", label), value, width = width + 1);
    }
}

/// Title with an underline of the same length.
pub fn print_heading(title: &str) {
    println!("{}", title);
    println!("{}", "=".repeat(title.len()));
}
