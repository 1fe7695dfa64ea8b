//! Turning query outcomes into console text, delimited text and JSON.

use crate::{Metric, QueryOutcome, Table};
use anyhow::{Context, Result};
use itertools::Itertools;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const DELIMITER: char = ',';

/// Quote a field when it holds the delimiter, a quote or a line break.
fn escape_field(field: &str) -> String {
    if field.contains([DELIMITER, '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// One header row, then one row per result row. No index column.
///
/// # Errors
/// Returns an error if the writer fails.
pub fn write_csv<W: Write>(table: &Table, mut writer: W) -> Result<()> {
    writeln!(
        writer,
        "{}{DELIMITER}{}",
        escape_field(&table.name_column),
        escape_field(&table.metric_column)
    )?;
    for row in &table.rows {
        writeln!(
            writer,
            "{}{DELIMITER}{}",
            escape_field(&row.name),
            row.metric
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// # Errors
/// Returns an error if the table cannot be written.
pub fn to_csv_string(table: &Table) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(table, &mut buffer)?;
    String::from_utf8(buffer).context("csv output is not valid UTF-8")
}

/// Write `table` to `<dir>/<query_name>.csv`, returning the path.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn save_csv(table: &Table, dir: &Path, query_name: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{query_name}.csv"));
    let file =
        File::create(&path).with_context(|| format!("could not create {}", path.display()))?;
    write_csv(table, BufWriter::new(file))
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(path)
}

/// Means are rounded for reading. Exports keep the full value.
fn console_metric(metric: Metric) -> String {
    match metric {
        Metric::Count(n) => n.to_string(),
        Metric::Mean(m) => format!("{m:.2}"),
    }
}

/// Human-readable block for one query.
pub fn render_console(title: &str, outcome: &QueryOutcome) -> String {
    let body = match outcome {
        QueryOutcome::Found(table) => {
            let width = table
                .rows
                .iter()
                .map(|r| r.name.chars().count())
                .chain([table.name_column.chars().count()])
                .max()
                .unwrap_or_default();
            let header = format!("{:<width$}  {}", table.name_column, table.metric_column);
            let rows = table
                .rows
                .iter()
                .map(|r| format!("{:<width$}  {}", r.name, console_metric(r.metric)))
                .join("\n");
            format!("{header}\n{rows}")
        }
        QueryOutcome::EmptyResult => "No data matched.".to_string(),
        QueryOutcome::CategoryNotFound { collection, name } => {
            format!("Category {name:?} does not exist in {collection}.")
        }
    };
    format!("=== {title} ===\n{body}\n")
}
