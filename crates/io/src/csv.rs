// Events CSV import, export table CSV output

use std::io::{Read, Write};
use std::path::Path;

use nodepix_core::{parse_stamp, Cell, Column, ColumnRole, Table, Value};

/// Load an events CSV.
///
/// Blank lines and lines starting with `#` are skipped, header names are
/// trimmed and every value is kept as text except in time columns, which are
/// parsed with `datetime_format` (unparseable → null).
pub fn load_events(path: &Path, datetime_format: &str) -> Result<Table, String> {
    let content = read_file_as_utf8(path)?;
    parse_events(&content, datetime_format)
}

pub fn parse_events(content: &str, datetime_format: &str) -> Result<Table, String> {
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect();
    if kept.is_empty() {
        return Ok(Table::empty());
    }
    let body = kept.join("\n");
    let delimiter = sniff_delimiter(&body);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let columns: Vec<Column> = headers
        .iter()
        .map(|h| {
            let name = h.trim();
            Column::new(name, ColumnRole::for_event_column(name))
        })
        .collect();

    let mut unparsed = 0usize;
    let mut table = Table::new(columns.clone());
    for result in reader.records() {
        let record = result.map_err(|e| e.to_string())?;
        let row: Vec<Cell> = columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let raw = record.get(i)?;
                if col.role != ColumnRole::Timestamp {
                    return Some(Value::text(raw));
                }
                let parsed = parse_stamp(raw, datetime_format);
                if !parsed.is_parsed() && !raw.trim().is_empty() {
                    unparsed += 1;
                }
                parsed.ok().map(Value::Timestamp)
            })
            .collect();
        table.push_row(row);
    }

    if unparsed > 0 {
        log::warn!("{unparsed} time value(s) did not match '{datetime_format}' and were left empty");
    }
    log::debug!("events: {} rows, {} columns", table.row_count(), columns.len());
    Ok(table)
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        // Must produce >1 field on the header line to be viable
        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed (field laptops often save Windows-1252)
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| e.to_string())?;

    match String::from_utf8(bytes) {
        Ok(s) => {
            if let Some(rest) = s.strip_prefix('\u{feff}') {
                return Ok(rest.to_string());
            }
            Ok(s)
        }
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Write the export table as CSV.
///
/// `columns` restricts and orders the output; unknown names are ignored.
/// Null cells are written as empty fields. Returns the number of data rows.
pub fn write_export(table: &Table, path: &Path, columns: Option<&[String]>) -> Result<usize, String> {
    let file = std::fs::File::create(path).map_err(|e| format!("{}: {e}", path.display()))?;
    write_export_to(table, file, columns)
}

/// [`write_export`] into any writer (stdout, buffers).
pub fn write_export_to<W: Write>(table: &Table, out: W, columns: Option<&[String]>) -> Result<usize, String> {
    let table = match columns {
        Some(names) => table.project(names),
        None => table.clone(),
    };

    let mut writer = csv::WriterBuilder::new().from_writer(out);
    writer
        .write_record(table.column_names())
        .map_err(|e| e.to_string())?;
    for row in table.rows() {
        let record: Vec<String> = row
            .iter()
            .map(|cell| cell.as_ref().map(|v| v.as_text().into_owned()).unwrap_or_default())
            .collect();
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }
    writer.flush().map_err(|e| e.to_string())?;
    Ok(table.row_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    #[test]
    fn test_events_skip_comments_and_blank_lines() {
        let content = "# exported from the survey log\n\n Line , Point,Index,NodeCode,Aslaid Time\n12,3,1,A 1,2024-05-01 10:00:00\n\n# trailer\n12,4,1,,not a time\n";
        let table = parse_events(content, FORMAT).unwrap();

        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(names, vec!["Line", "Point", "Index", "NodeCode", "Aslaid Time"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.cell(0, "NodeCode"), Some(&Value::text("A 1")));
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(table.cell(0, "Aslaid Time"), Some(&Value::Timestamp(expected)));
        // Empty strings survive as text; bad times become null.
        assert_eq!(table.cell(1, "NodeCode"), Some(&Value::text("")));
        assert_eq!(table.cell(1, "Aslaid Time"), None);
    }

    #[test]
    fn test_events_roles_from_headers() {
        let table = parse_events("Line,Point,Index,Deployed by ROV,Recovered Time\n1,2,3,ROV1,\n", FORMAT).unwrap();
        assert_eq!(table.columns()[0].role, ColumnRole::Key);
        assert_eq!(table.columns()[3].role, ColumnRole::RovAttribution);
        assert_eq!(table.columns()[4].role, ColumnRole::Timestamp);
    }

    #[test]
    fn test_events_short_rows_padded_with_null() {
        let table = parse_events("Line,Point,Index,NodeCode\n1,2,3\n", FORMAT).unwrap();
        assert_eq!(table.cell(0, "Index"), Some(&Value::text("3")));
        assert_eq!(table.cell(0, "NodeCode"), None);
    }

    #[test]
    fn test_events_only_comments_is_empty() {
        let table = parse_events("# nothing\n\n", FORMAT).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.column_names().count(), 0);
    }

    #[test]
    fn test_sniff_semicolon_delimiter() {
        let content = "Line;Point;Index\n12;3;1\n12;4;1\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_sniff_comma_delimiter() {
        let content = "Line,Point,Index\n12,3,1\n12,4,1\n";
        assert_eq!(sniff_delimiter(content), b',');
    }

    #[test]
    fn test_sniff_tab_delimiter() {
        let content = "Line\tPoint\tIndex\n12\t3\t1\n";
        assert_eq!(sniff_delimiter(content), b'\t');
    }

    #[test]
    fn test_sniff_semicolon_with_commas_in_values() {
        let content = "Line;Point;DeployedComments\n12;3;\"tilted, re-seated\"\n12;4;ok\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn test_windows_1252_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        // "Comment" value "café" in Windows-1252
        let mut bytes = b"Line,Point,Index,DeployedComments\n1,2,3,caf".to_vec();
        bytes.push(0xE9);
        bytes.push(b'\n');
        fs::write(&path, bytes).unwrap();

        let table = load_events(&path, FORMAT).unwrap();
        assert_eq!(table.cell(0, "DeployedComments"), Some(&Value::text("café")));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_events(Path::new("/nonexistent/events.csv"), FORMAT).unwrap_err();
        assert!(err.contains("/nonexistent/events.csv"));
    }

    #[test]
    fn test_write_export_with_selection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let stamp = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(10, 20, 0).unwrap();
        let table = Table::from_rows(
            vec![
                Column::new("Node Name", ColumnRole::NodeName),
                Column::new("NodeCode", ColumnRole::NodeCode),
                Column::new("Datetime_dep", ColumnRole::Timestamp),
            ],
            vec![
                vec![Some(Value::text("1231")), Some(Value::text("A1")), Some(Value::Timestamp(stamp))],
                vec![Some(Value::text("1241")), None, None],
            ],
        );

        let written = write_export(&table, &path, None).unwrap();
        assert_eq!(written, 2);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "Node Name,NodeCode,Datetime_dep\n1231,A1,2024-05-01 10:20:00\n1241,,\n"
        );

        let selection = vec!["Datetime_dep".to_string(), "Node Name".to_string(), "Bogus".to_string()];
        write_export(&table, &path, Some(&selection)).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Datetime_dep,Node Name\n2024-05-01 10:20:00,1231\n,1241\n");
    }
}
