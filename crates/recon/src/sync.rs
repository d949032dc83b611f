//! Write export columns into an existing spreadsheet by column mapping.
//!
//! Rows are aligned by position: export row `i` goes to data row `i` of the
//! sheet (the row right under the header is data row 0). The export table is
//! expected to be in the same row order as the sheet; when `Node Name` is among
//! the mapped columns this is checked before anything is written.

use nodepix_core::{cell_is_blank, Cell, Table, Value};
use serde::Serialize;

use crate::config::ColumnMapping;
use crate::error::ReconError;
use crate::merge::NODE_NAME;

/// A worksheet the synchronizer can write into.
///
/// Row indices are data-row indices (0 = first row under the header).
pub trait SheetTarget {
    /// Header texts of the first row, in column order.
    fn headers(&self) -> Vec<String>;

    /// Number of data rows currently under the header.
    fn data_row_count(&self) -> usize;

    /// Extend the data region by `count` empty rows.
    fn append_empty_rows(&mut self, count: usize);

    /// Current text of a cell, `None` when empty.
    fn cell_text(&self, row: usize, col: usize) -> Option<String>;

    fn write_cell(&mut self, row: usize, col: usize, value: &Value);

    fn clear_cell(&mut self, row: usize, col: usize);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Refuse to write when existing rows are not in export order.
    pub require_alignment: bool,
}

/// A mapping entry that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPair {
    pub sheet_column: String,
    pub export_column: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub rows_written: usize,
    pub rows_appended: usize,
    /// `(sheet column, export column)` pairs that were written.
    pub columns_written: Vec<(String, String)>,
    pub skipped: Vec<SkippedPair>,
    /// 1-based sheet row numbers whose node name disagrees with the export.
    pub misaligned_rows: Vec<usize>,
}

/// Sheet row number (1-based, header = 1) of a data row index.
pub fn sheet_row_number(data_row: usize) -> usize {
    data_row + 2
}

struct ResolvedPair {
    sheet_col: usize,
    export_col: usize,
    sheet_name: String,
    export_name: String,
}

pub fn synchronize<T: SheetTarget + ?Sized>(
    target: &mut T,
    mapping: &ColumnMapping,
    table: &Table,
    options: SyncOptions,
) -> Result<SyncReport, ReconError> {
    if mapping.is_empty() {
        return Err(ReconError::EmptyMapping);
    }

    let headers = target.headers();
    let mut report = SyncReport::default();
    let mut pairs = Vec::new();
    for (sheet_name, export_name) in mapping {
        let sheet_col = headers.iter().position(|h| h.trim() == sheet_name.trim());
        let export_col = table.column_index(export_name);
        match (sheet_col, export_col) {
            (Some(sheet_col), Some(export_col)) => pairs.push(ResolvedPair {
                sheet_col,
                export_col,
                sheet_name: sheet_name.clone(),
                export_name: export_name.clone(),
            }),
            (None, _) => report.skipped.push(SkippedPair {
                sheet_column: sheet_name.clone(),
                export_column: export_name.clone(),
                reason: "no such spreadsheet column".into(),
            }),
            (Some(_), None) => report.skipped.push(SkippedPair {
                sheet_column: sheet_name.clone(),
                export_column: export_name.clone(),
                reason: "no such export column".into(),
            }),
        }
    }
    for skipped in &report.skipped {
        log::warn!(
            "skipping mapping '{}' -> '{}': {}",
            skipped.sheet_column,
            skipped.export_column,
            skipped.reason
        );
    }

    report.misaligned_rows = check_alignment(target, &pairs, table);
    if !report.misaligned_rows.is_empty() {
        if options.require_alignment {
            return Err(ReconError::Misaligned {
                rows: report.misaligned_rows,
            });
        }
        log::warn!(
            "{} spreadsheet row(s) do not match the export order",
            report.misaligned_rows.len()
        );
    }

    let existing = target.data_row_count();
    if table.row_count() > existing {
        report.rows_appended = table.row_count() - existing;
        target.append_empty_rows(report.rows_appended);
    }

    for pair in &pairs {
        for (i, row) in table.rows().iter().enumerate() {
            write_value(target, i, pair.sheet_col, &row[pair.export_col]);
        }
        report
            .columns_written
            .push((pair.sheet_name.clone(), pair.export_name.clone()));
    }
    report.rows_written = if pairs.is_empty() { 0 } else { table.row_count() };

    log::info!(
        "synchronized {} row(s) into {} column(s), {} row(s) appended",
        report.rows_written,
        report.columns_written.len(),
        report.rows_appended
    );
    Ok(report)
}

fn write_value<T: SheetTarget + ?Sized>(target: &mut T, row: usize, col: usize, cell: &Cell) {
    match cell {
        Some(value) if !cell_is_blank(cell) => target.write_cell(row, col, value),
        _ => target.clear_cell(row, col),
    }
}

/// Sheet rows whose existing node name differs from the export row at the
/// same position. Empty sheet cells are not a mismatch.
fn check_alignment<T: SheetTarget + ?Sized>(
    target: &T,
    pairs: &[ResolvedPair],
    table: &Table,
) -> Vec<usize> {
    let Some(pair) = pairs.iter().find(|p| p.export_name == NODE_NAME) else {
        return Vec::new();
    };
    let overlap = target.data_row_count().min(table.row_count());
    (0..overlap)
        .filter(|&i| {
            let Some(existing) = target.cell_text(i, pair.sheet_col) else {
                return false;
            };
            let existing = existing.trim();
            if existing.is_empty() {
                return false;
            }
            let export = table.rows()[i][pair.export_col]
                .as_ref()
                .map(|v| v.as_text().trim().to_string())
                .unwrap_or_default();
            existing != export
        })
        .map(sheet_row_number)
        .collect()
}
