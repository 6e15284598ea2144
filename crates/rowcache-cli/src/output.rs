//! Rendering rows for the terminal and writing export files.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::Value;

use rowcache_core::utils::truncate_string;

/// Widest a table cell may get before it is truncated
const MAX_CELL_WIDTH: usize = 24;

/// Column used for rows that are not JSON objects
const SCALAR_COLUMN: &str = "value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PageFormat {
    /// One JSON object per line
    Jsonl,
    /// Aligned columns for reading in a terminal
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

// ============================================================================
// Page output
// ============================================================================

/// Print one page. Rows still missing from the cache print as `null` (JSONL)
/// or `(loading)` (table).
pub fn print_page(rows: &[Option<&Value>], format: PageFormat, out: &mut impl Write) -> Result<()> {
    match format {
        PageFormat::Jsonl => {
            for row in rows {
                match row {
                    Some(value) => writeln!(out, "{}", serde_json::to_string(value)?)?,
                    None => writeln!(out, "null")?,
                }
            }
        }
        PageFormat::Table => {
            let present: Vec<&Value> = rows.iter().flatten().copied().collect();
            let columns = columns(&present);
            let mut lines: Vec<Vec<String>> = Vec::with_capacity(rows.len() + 1);
            lines.push(columns.clone());
            for row in rows {
                match row {
                    Some(value) => lines.push(
                        columns
                            .iter()
                            .map(|c| truncate_string(&cell(value, c), MAX_CELL_WIDTH))
                            .collect(),
                    ),
                    None => lines.push(vec!["(loading)".to_string()]),
                }
            }

            let widths: Vec<usize> = (0..columns.len())
                .map(|i| {
                    lines
                        .iter()
                        .filter_map(|l| l.get(i))
                        .map(|c| c.chars().count())
                        .max()
                        .unwrap_or(0)
                })
                .collect();

            for line in lines {
                let padded: Vec<String> = line
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| format!("{:<width$}", c, width = *w))
                    .collect();
                writeln!(out, "{}", padded.join("  ").trim_end())?;
            }
        }
    }
    Ok(())
}

/// Status line printed to stderr after a page.
pub fn page_footer(page: usize, pages: usize, total: usize, age: &str) -> String {
    format!("page {} of {} ({} rows, updated {})", page, pages, total, age)
}

// ============================================================================
// Export output
// ============================================================================

/// Write exported rows to `path`, replacing it only once the whole file has
/// been written.
pub fn write_export(rows: &[Value], format: ExportFormat, path: &Path) -> Result<()> {
    let bytes = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(rows)?,
        ExportFormat::Csv => render_csv(rows)?,
    };
    write_atomic(path, &bytes)
}

fn render_csv(rows: &[Value]) -> Result<Vec<u8>> {
    let refs: Vec<&Value> = rows.iter().collect();
    let columns = columns(&refs);

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }
    for row in rows {
        let record: Vec<String> = columns.iter().map(|c| cell(row, c)).collect();
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV: {}", e))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);
    std::fs::write(&temp_path, bytes)
        .with_context(|| format!("failed to write temp file: {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename to output: {}", path.display()))?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Union of top-level keys across rows, in first-seen order.
fn columns(rows: &[&Value]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        match row {
            Value::Object(map) => {
                for key in map.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => {
                if !columns.iter().any(|c| c == SCALAR_COLUMN) {
                    columns.push(SCALAR_COLUMN.to_string());
                }
            }
        }
    }
    columns
}

fn cell(row: &Value, column: &str) -> String {
    let value = match row {
        Value::Object(map) => map.get(column),
        other if column == SCALAR_COLUMN => Some(other),
        _ => None,
    };
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
