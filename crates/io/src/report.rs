// Images report: a formatted xlsx summary of photo file names and visit dates

use std::path::Path;

use chrono::Datelike;
use nodepix_core::{Table, Value};
use rust_xlsxwriter::{Color, ExcelDateTime, Format, FormatAlign, Workbook as XlsxWorkbook};

/// Export column → report header, in report order.
const REPORT_COLUMNS: &[(&str, &str)] = &[
    ("Node Name", "Node name \nXXXXYYYYZ"),
    ("filename_dep", "File name Deployment"),
    ("filename_rec", "File name Recovery"),
    ("Datetime_dep", "Date - Node Deployment"),
    ("Datetime_rec", "Date - Node Recovery"),
];

/// Always-present trailing columns; the upload dates are filled in by hand later.
const TRAILING_HEADERS: &[&str] = &[
    "Date - Image Node Deployment upload",
    "Date - Image Node Recovery upload",
    "Comment",
];

const COMMENT_COLUMNS: &[&str] = &["DeployedComments", "RecoveredComments"];

const WIDTHS: &[f64] = &[16.14, 55.29, 55.29, 25.0, 25.0, 38.0, 38.0, 38.0];
const DEFAULT_WIDTH: f64 = 20.0;

/// Write the images report for an export table.
///
/// Only the report columns the table has are included. Returns the number
/// of data rows written.
pub fn write_images_report(table: &Table, path: &Path) -> Result<usize, String> {
    if table.is_empty() {
        return Err("Export table is empty, nothing to report".to_string());
    }
    let present: Vec<(&str, &str)> = REPORT_COLUMNS
        .iter()
        .copied()
        .filter(|(col, _)| table.has_column(col))
        .collect();
    if present.is_empty() {
        return Err("Export table has none of the report columns".to_string());
    }

    let header_format = Format::new()
        .set_bold()
        .set_font_name("Aptos Narrow")
        .set_font_size(11)
        .set_background_color(Color::RGB(0xDDDDDD))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap();
    let text_format = Format::new().set_font_name("Aptos Narrow").set_font_size(11);
    let date_format = text_format.clone().set_num_format("yyyy-mm-dd");
    let comment_format = text_format.clone().set_align(FormatAlign::Left);

    let mut workbook = XlsxWorkbook::new();
    let worksheet = workbook
        .add_worksheet()
        .set_name("IMAGES")
        .map_err(|e| format!("Failed to create sheet: {}", e))?;

    let headers: Vec<&str> = present
        .iter()
        .map(|(_, header)| *header)
        .chain(TRAILING_HEADERS.iter().copied())
        .collect();
    for (c, header) in headers.iter().enumerate() {
        let width = WIDTHS.get(c).copied().unwrap_or(DEFAULT_WIDTH);
        worksheet
            .set_column_width(c as u16, width)
            .map_err(|e| format!("Failed to set column {} width: {}", c, e))?;
        worksheet
            .write_string_with_format(0, c as u16, *header, &header_format)
            .map_err(|e| format!("Failed to write header: {}", e))?;
    }

    let comment_col = (headers.len() - 1) as u16;
    for r in 0..table.row_count() {
        let row = (r + 1) as u32;
        for (c, (name, _)) in present.iter().enumerate() {
            let col = c as u16;
            match table.cell(r, name) {
                Some(Value::Timestamp(ts)) => {
                    let date = ExcelDateTime::from_ymd(ts.year() as u16, ts.month() as u8, ts.day() as u8)
                        .map_err(|e| format!("Invalid date in {}: {}", name, e))?;
                    worksheet
                        .write_datetime_with_format(row, col, &date, &date_format)
                        .map_err(|e| format!("Failed to write cell: {}", e))?;
                }
                Some(value) if !value.is_blank() => {
                    worksheet
                        .write_string_with_format(row, col, value.as_text().as_ref(), &text_format)
                        .map_err(|e| format!("Failed to write cell: {}", e))?;
                }
                _ => {}
            }
        }

        let comment = row_comment(table, r);
        if !comment.is_empty() {
            worksheet
                .write_string_with_format(row, comment_col, &comment, &comment_format)
                .map_err(|e| format!("Failed to write comment: {}", e))?;
        }
    }

    worksheet
        .set_freeze_panes(1, 0)
        .map_err(|e| format!("Failed to freeze header: {}", e))?;
    workbook
        .save(path)
        .map_err(|e| format!("Failed to save {}: {}", path.display(), e))?;

    log::info!("images report: {} rows → {}", table.row_count(), path.display());
    Ok(table.row_count())
}

/// Non-blank visit comments of a row joined with " | ".
fn row_comment(table: &Table, row: usize) -> String {
    COMMENT_COLUMNS
        .iter()
        .filter_map(|col| table.cell(row, col))
        .filter(|v| !v.is_blank())
        .map(|v| v.as_text().trim().to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}
