// Existing-workbook access: header listing and in-place cell synchronization
//
// The synchronizer must not disturb anything it was not asked to change, so
// workbooks are not round-tripped through a spreadsheet model. Instead the
// first worksheet's XML is split into rows and cells, only the touched cells
// are regenerated, and every other archive entry is copied byte for byte.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Reader, Sheets};
use chrono::{Datelike, NaiveDateTime, Timelike};
use nodepix_core::{Table, Value};
use nodepix_recon::sync::{synchronize, SheetTarget, SyncOptions, SyncReport};
use nodepix_recon::{ColumnMapping, ReconError};
use quick_xml::events::Event;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum SheetError {
    /// The workbook does not exist.
    NotFound(PathBuf),
    /// The workbook exists but cannot be opened for writing (open in Excel, read-only, ...).
    Locked(PathBuf),
    /// Not a readable xlsx archive, or no worksheet in it.
    Invalid(String),
    /// Synchronization refused (empty mapping, misaligned rows).
    Sync(ReconError),
    Io(String),
}

impl fmt::Display for SheetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "spreadsheet not found: {}", path.display()),
            Self::Locked(path) => write!(
                f,
                "spreadsheet is locked or read-only: {} (close it in other programs and retry)",
                path.display()
            ),
            Self::Invalid(msg) => write!(f, "invalid spreadsheet: {msg}"),
            Self::Sync(e) => write!(f, "{e}"),
            Self::Io(msg) => write!(f, "spreadsheet IO error: {msg}"),
        }
    }
}

impl std::error::Error for SheetError {}

impl From<ReconError> for SheetError {
    fn from(e: ReconError) -> Self {
        Self::Sync(e)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> SheetError {
    match e.kind() {
        ErrorKind::NotFound => SheetError::NotFound(path.to_path_buf()),
        ErrorKind::PermissionDenied => SheetError::Locked(path.to_path_buf()),
        _ => SheetError::Io(format!("{}: {e}", path.display())),
    }
}

fn zip_error(e: zip::result::ZipError) -> SheetError {
    SheetError::Invalid(e.to_string())
}

// ============================================================================
// Header listing
// ============================================================================

/// Texts of the first row of the first worksheet, by column position.
///
/// Empty header cells come back as empty strings so positions line up with
/// spreadsheet columns.
pub fn read_headers(path: &Path) -> Result<Vec<String>, SheetError> {
    if !path.exists() {
        return Err(SheetError::NotFound(path.to_path_buf()));
    }
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| SheetError::Invalid(format!("Failed to open Excel file: {e}")))?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| SheetError::Invalid("Excel file contains no sheets".into()))?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| SheetError::Invalid(format!("Failed to read sheet '{first}': {e}")))?;

    let Some((_, last_col)) = range.end() else {
        return Ok(Vec::new());
    };
    Ok((0..=last_col)
        .map(|c| range.get_value((0, c)).map(|d| d.to_string()).unwrap_or_default())
        .collect())
}

// ============================================================================
// Worksheet model
// ============================================================================

#[derive(Debug, Clone)]
struct CellXml {
    /// Serialized `<c>` element.
    raw: String,
    style: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct RowXml {
    /// Original `<row>` element; dropped as soon as one of its cells changes.
    raw: Option<String>,
    attrs: Vec<(String, String)>,
    cells: BTreeMap<u32, CellXml>,
}

/// First worksheet of an existing xlsx, opened for in-place cell edits.
#[derive(Debug)]
pub struct XlsxSheet {
    path: PathBuf,
    sheet_entry: String,
    prefix: String,
    suffix: String,
    rows: BTreeMap<u32, RowXml>,
    data_rows: usize,
    changed: bool,
    /// `xl/styles.xml`, patched in memory when a date style has to be added.
    styles: Option<String>,
    styles_changed: bool,
    date_style: Option<String>,
}

impl XlsxSheet {
    pub fn open(path: &Path) -> Result<Self, SheetError> {
        let file = File::open(path).map_err(|e| io_error(path, e))?;
        let mut archive = ZipArchive::new(file).map_err(zip_error)?;

        let workbook_xml = read_zip_file(&mut archive, "xl/workbook.xml")
            .ok_or_else(|| SheetError::Invalid("missing xl/workbook.xml".into()))?;
        let rels_xml = read_zip_file(&mut archive, "xl/_rels/workbook.xml.rels")
            .ok_or_else(|| SheetError::Invalid("missing workbook relationships".into()))?;
        let sheet_entry = resolve_worksheet_paths(&workbook_xml, &rels_xml)
            .into_iter()
            .next()
            .ok_or_else(|| SheetError::Invalid("workbook has no worksheet".into()))?;
        let sheet_xml = read_zip_file(&mut archive, &sheet_entry)
            .ok_or_else(|| SheetError::Invalid(format!("missing {sheet_entry}")))?;
        let styles = read_zip_file(&mut archive, STYLES_ENTRY);
        let shared_strings = read_zip_file(&mut archive, "xl/sharedStrings.xml")
            .map(|xml| parse_shared_strings(&xml))
            .unwrap_or_default();

        let parsed = parse_sheet_xml(&sheet_xml, &shared_strings)?;
        let data_rows = parsed
            .rows
            .iter()
            .filter(|(_, row)| !row.cells.is_empty())
            .map(|(&r, _)| r as usize)
            .max()
            .unwrap_or(0)
            .saturating_sub(1);

        log::debug!(
            "opened {} ({}): {} data row(s)",
            path.display(),
            sheet_entry,
            data_rows
        );
        Ok(Self {
            path: path.to_path_buf(),
            sheet_entry,
            prefix: parsed.prefix,
            suffix: parsed.suffix,
            rows: parsed.rows,
            data_rows,
            changed: false,
            styles,
            styles_changed: false,
            date_style: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fail early with `Locked` when the workbook cannot be written.
    pub fn check_writable(&self) -> Result<(), SheetError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map(|_| ())
            .map_err(|e| io_error(&self.path, e))
    }

    /// Write the workbook back.
    ///
    /// A complete archive is written next to the original and renamed over
    /// it, so a failure leaves the original untouched.
    pub fn save(&self) -> Result<(), SheetError> {
        if !self.changed {
            return Ok(());
        }
        self.check_writable()?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workbook.xlsx".into());
        let tmp = self.path.with_file_name(format!(".{file_name}.nodepix-tmp"));

        let result = self.write_archive(&tmp).and_then(|_| {
            std::fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, e))
        });
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result?;
        log::info!("saved {}", self.path.display());
        Ok(())
    }

    fn write_archive(&self, tmp: &Path) -> Result<(), SheetError> {
        let source = File::open(&self.path).map_err(|e| io_error(&self.path, e))?;
        let mut archive = ZipArchive::new(source).map_err(zip_error)?;
        let out = File::create(tmp).map_err(|e| io_error(tmp, e))?;
        let mut writer = ZipWriter::new(out);
        let sheet_xml = self.to_xml();
        let styles_xml = self.styles.as_deref().filter(|_| self.styles_changed);

        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(zip_error)?;
            let name = entry.name().to_string();
            let replacement = if name == self.sheet_entry {
                Some(sheet_xml.as_str())
            } else if name == STYLES_ENTRY {
                styles_xml
            } else {
                None
            };
            match replacement {
                Some(xml) => {
                    drop(entry);
                    let options =
                        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
                    writer.start_file(name.as_str(), options).map_err(zip_error)?;
                    writer.write_all(xml.as_bytes()).map_err(|e| io_error(tmp, e))?;
                }
                None => writer.raw_copy_file(entry).map_err(zip_error)?,
            }
        }
        writer.finish().map_err(zip_error)?;
        Ok(())
    }

    fn to_xml(&self) -> String {
        let mut out = self.prefix_with_dimension();
        for (&r, row) in &self.rows {
            if let Some(raw) = &row.raw {
                out.push_str(raw);
                continue;
            }
            out.push_str("<row");
            for (key, value) in &row.attrs {
                // spans is an optional hint that goes stale once cells change
                if key != "spans" {
                    out.push_str(&format!(" {key}=\"{value}\""));
                }
            }
            if !row.attrs.iter().any(|(k, _)| k == "r") {
                out.push_str(&format!(" r=\"{r}\""));
            }
            if row.cells.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for cell in row.cells.values() {
                    out.push_str(&cell.raw);
                }
                out.push_str("</row>");
            }
        }
        out.push_str(&self.suffix);
        out
    }

    /// Prefix with `<dimension ref>` widened to the current extent.
    fn prefix_with_dimension(&self) -> String {
        if !self.changed {
            return self.prefix.clone();
        }
        let last_row = self
            .rows
            .keys()
            .copied()
            .max()
            .unwrap_or(1)
            .max(self.data_rows as u32 + 1);
        let last_col = self
            .rows
            .values()
            .filter_map(|row| row.cells.keys().copied().max())
            .max()
            .unwrap_or(0);
        let reference = format!("A1:{}{}", col_to_letter(last_col as usize), last_row);

        const MARKER: &str = "<dimension ref=\"";
        let Some(start) = self.prefix.find(MARKER).map(|i| i + MARKER.len()) else {
            return self.prefix.clone();
        };
        let Some(len) = self.prefix[start..].find('"') else {
            return self.prefix.clone();
        };
        format!("{}{}{}", &self.prefix[..start], reference, &self.prefix[start + len..])
    }

    fn row_mut(&mut self, sheet_row: u32) -> &mut RowXml {
        let row = self.rows.entry(sheet_row).or_insert_with(|| RowXml {
            raw: None,
            attrs: vec![("r".into(), sheet_row.to_string())],
            cells: BTreeMap::new(),
        });
        row.raw = None;
        row
    }

    /// Index of a cellXfs entry with a date-time number format, added on first use.
    fn date_style(&mut self) -> Option<String> {
        if self.date_style.is_none() {
            let (index, patched) = date_xf(self.styles.as_deref()?)?;
            if let Some(patched) = patched {
                log::debug!("added date style {index} to {STYLES_ENTRY}");
                self.styles = Some(patched);
                self.styles_changed = true;
            }
            self.date_style = Some(index.to_string());
        }
        self.date_style.clone()
    }
}

/// Data row index → 1-based sheet row (row 1 is the header).
fn sheet_row(data_row: usize) -> u32 {
    data_row as u32 + 2
}

impl SheetTarget for XlsxSheet {
    fn headers(&self) -> Vec<String> {
        let Some(row) = self.rows.get(&1) else {
            return Vec::new();
        };
        let Some(&last) = row.cells.keys().max() else {
            return Vec::new();
        };
        (0..=last)
            .map(|c| row.cells.get(&c).and_then(|cell| cell.text.clone()).unwrap_or_default())
            .collect()
    }

    fn data_row_count(&self) -> usize {
        self.data_rows
    }

    fn append_empty_rows(&mut self, count: usize) {
        self.data_rows += count;
        self.changed = true;
    }

    fn cell_text(&self, row: usize, col: usize) -> Option<String> {
        self.rows
            .get(&sheet_row(row))?
            .cells
            .get(&(col as u32))?
            .text
            .clone()
    }

    fn write_cell(&mut self, row: usize, col: usize, value: &Value) {
        let r = sheet_row(row);
        let reference = cell_ref(r, col);
        let mut style = self
            .rows
            .get(&r)
            .and_then(|row| row.cells.get(&(col as u32)))
            .and_then(|c| c.style.clone());
        let (raw, text) = match value {
            Value::Text(s) => (inline_string_cell(&reference, style.as_deref(), s), s.clone()),
            Value::Timestamp(ts) => {
                if style.is_none() {
                    style = self.date_style();
                }
                let raw = number_cell(&reference, style.as_deref(), excel_serial(ts));
                (raw, ts.format("%Y-%m-%d %H:%M:%S").to_string())
            }
        };
        let row_xml = self.row_mut(r);
        row_xml.cells.insert(
            col as u32,
            CellXml {
                raw,
                style,
                text: Some(text),
            },
        );
        self.changed = true;
    }

    fn clear_cell(&mut self, row: usize, col: usize) {
        let r = sheet_row(row);
        let col = col as u32;
        let has_cell = self
            .rows
            .get(&r)
            .is_some_and(|row| row.cells.contains_key(&col));
        if !has_cell {
            return;
        }
        let row_xml = self.row_mut(r);
        let style = row_xml.cells.get(&col).and_then(|c| c.style.clone());
        match style {
            Some(style) => {
                let raw = format!("<c r=\"{}\" s=\"{style}\"/>", cell_ref(r, col as usize));
                row_xml.cells.insert(
                    col,
                    CellXml {
                        raw,
                        style: Some(style),
                        text: None,
                    },
                );
            }
            None => {
                row_xml.cells.remove(&col);
            }
        }
        self.changed = true;
    }
}

/// Open, synchronize and save one workbook as a unit.
///
/// Nothing is written when the mapping is rejected or rows are misaligned
/// under `require_alignment`.
pub fn sync_workbook(
    path: &Path,
    mapping: &ColumnMapping,
    table: &Table,
    options: SyncOptions,
) -> Result<SyncReport, SheetError> {
    if !path.exists() {
        return Err(SheetError::NotFound(path.to_path_buf()));
    }
    let mut sheet = XlsxSheet::open(path)?;
    sheet.check_writable()?;
    let report = synchronize(&mut sheet, mapping, table, options)?;
    sheet.save()?;
    Ok(report)
}

// ============================================================================
// XML helpers
// ============================================================================

const STYLES_ENTRY: &str = "xl/styles.xml";

/// Built-in number format `m/d/yy h:mm`.
const DATE_TIME_NUM_FMT: u32 = 22;

/// Day number of 1899-12-30 counted from 0001-01-01.
const EXCEL_EPOCH_DAYS_FROM_CE: i32 = 693_594;

/// Excel serial date: days since 1899-12-30, time of day as the fraction.
/// Dates before 1900-03-01 are off by one (the 1900 leap-year quirk is not modelled).
fn excel_serial(ts: &NaiveDateTime) -> f64 {
    let days = ts.date().num_days_from_ce() - EXCEL_EPOCH_DAYS_FROM_CE;
    let time = ts.time();
    let millis = u64::from(time.num_seconds_from_midnight()) * 1000
        + u64::from(time.nanosecond() / 1_000_000);
    f64::from(days) + millis as f64 / 86_400_000.0
}

fn number_cell(reference: &str, style: Option<&str>, value: f64) -> String {
    let style = style.map(|s| format!(" s=\"{s}\"")).unwrap_or_default();
    format!("<c r=\"{reference}\"{style}><v>{value}</v></c>")
}

/// Index of the first `<cellXfs>` entry using the date-time format.
/// When there is none, one is appended and the patched XML comes back too.
fn date_xf(styles_xml: &str) -> Option<(usize, Option<String>)> {
    use quick_xml::Reader;

    let mut reader = Reader::from_str(styles_xml);
    let mut open_tag: Option<(usize, usize)> = None;
    let mut depth = 0usize;
    let mut count = 0usize;
    let num_fmt = DATE_TIME_NUM_FMT.to_string();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().ok()?;
        let end = reader.buffer_position() as usize;
        match event {
            Event::Start(ref e) if open_tag.is_none() && e.name().as_ref() == b"cellXfs" => {
                open_tag = Some((start, end));
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if open_tag.is_some() && depth == 0 && e.name().as_ref() == b"xf" =>
            {
                let is_date = e
                    .attributes()
                    .flatten()
                    .any(|a| a.key.as_ref() == b"numFmtId" && attr_value(&a) == num_fmt);
                if is_date {
                    return Some((count, None));
                }
                count += 1;
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::Start(_) if open_tag.is_some() => depth += 1,
            Event::End(ref e) if open_tag.is_some() && depth == 0 => {
                if e.name().as_ref() != b"cellXfs" {
                    return None;
                }
                let (tag_start, tag_end) = open_tag?;
                let tag = &styles_xml[tag_start..tag_end];
                let tag = match attribute_span(tag, "count") {
                    Some((a, b)) => format!("{}{}{}", &tag[..a], count + 1, &tag[b..]),
                    None => tag.to_string(),
                };
                let xf = format!(
                    "<xf numFmtId=\"{DATE_TIME_NUM_FMT}\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\" applyNumberFormat=\"1\"/>"
                );
                let patched = format!(
                    "{}{}{}{}{}",
                    &styles_xml[..tag_start],
                    tag,
                    &styles_xml[tag_end..start],
                    xf,
                    &styles_xml[start..]
                );
                return Some((count, Some(patched)));
            }
            Event::End(_) if open_tag.is_some() => depth -= 1,
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// Byte range of an attribute's value inside a start tag.
fn attribute_span(tag: &str, name: &str) -> Option<(usize, usize)> {
    let marker = format!(" {name}=\"");
    let start = tag.find(&marker)? + marker.len();
    let len = tag[start..].find('"')?;
    Some((start, start + len))
}

fn cell_ref(sheet_row: u32, col: usize) -> String {
    format!("{}{}", col_to_letter(col), sheet_row)
}

fn inline_string_cell(reference: &str, style: Option<&str>, text: &str) -> String {
    let style = style.map(|s| format!(" s=\"{s}\"")).unwrap_or_default();
    format!(
        "<c r=\"{reference}\"{style} t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
        quick_xml::escape::escape(text)
    )
}

/// Convert column index to Excel column letter (0 = A, 25 = Z, 26 = AA, etc.)
fn col_to_letter(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Parse an XLSX cell reference like "R104" or "AA1" to (row, col), row 1-based, col 0-based.
fn parse_xlsx_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let mut col: u32 = 0;
    let mut row_part = String::new();
    for ch in cell_ref.chars() {
        if ch.is_ascii_alphabetic() {
            col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        } else if ch.is_ascii_digit() {
            row_part.push(ch);
        }
    }
    if col == 0 || row_part.is_empty() {
        return None;
    }
    Some((row_part.parse().ok()?, col - 1))
}

/// Read a file from a ZIP archive, returning None on error.
fn read_zip_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Option<String> {
    let mut file = archive.by_name(path).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

fn attr_value(attr: &quick_xml::events::attributes::Attribute) -> String {
    String::from_utf8_lossy(&attr.value).to_string()
}

/// Resolve worksheet XML paths from workbook.xml + workbook.xml.rels, in sheet order.
fn resolve_worksheet_paths(workbook_xml: &str, rels_xml: &str) -> Vec<String> {
    use quick_xml::Reader;

    let mut rids = Vec::new();
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.name().as_ref() == b"sheet" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"r:id" {
                        rids.push(attr_value(&attr));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let mut rid_to_target: HashMap<String, String> = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr_value(&attr)),
                        b"Target" => target = Some(attr_value(&attr)),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    rid_to_target.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    rids.iter()
        .filter_map(|rid| rid_to_target.get(rid))
        // Only worksheet targets (skip chartsheets, etc.)
        .filter(|target| target.contains("worksheet"))
        .map(|target| match target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("xl/{target}"),
        })
        .collect()
}

/// Resolve `&name;` / `&#NN;` references reported between text events.
fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".into(),
        "lt" => "<".into(),
        "gt" => ">".into(),
        "quot" => "\"".into(),
        "apos" => "'".into(),
        _ => {
            let code = name
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| name.strip_prefix('#').and_then(|dec| dec.parse().ok()));
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| format!("&{name};"))
        }
    }
}

/// Unescape the 5 predefined XML entities: &amp; &lt; &gt; &quot; &apos;
fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    use quick_xml::Reader;

    let mut strings = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false); // preserve whitespace in string values
    let mut buf = Vec::new();

    let mut in_si = false;
    let mut in_t = false;
    let mut current_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"si" => {
                    in_si = true;
                    current_text.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_t => {
                current_text.push_str(&unescape_xml(&String::from_utf8_lossy(e.as_ref())));
            }
            Ok(Event::GeneralRef(ref e)) if in_t => {
                current_text.push_str(&resolve_entity(&String::from_utf8_lossy(e.as_ref())));
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    strings.push(std::mem::take(&mut current_text));
                    in_si = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    strings
}

/// Resolve a cell's display text from its XLSX type and raw text.
fn resolve_cell_value(
    cell_type: Option<&str>,
    value_text: &str,
    inline_text: &str,
    shared_strings: &[String],
) -> Option<String> {
    let text = match cell_type {
        Some("s") => shared_strings.get(value_text.trim().parse::<usize>().ok()?)?.clone(),
        Some("inlineStr") => inline_text.to_string(),
        Some("b") => match value_text {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            _ => return None,
        },
        _ => value_text.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

struct ParsedSheet {
    prefix: String,
    suffix: String,
    rows: BTreeMap<u32, RowXml>,
}

#[derive(Default)]
struct CellScan {
    start: usize,
    row: u32,
    col: u32,
    style: Option<String>,
    cell_type: Option<String>,
    value: String,
    inline: String,
    in_v: bool,
    in_is: bool,
    in_t: bool,
}

/// Split worksheet XML into prefix, rows/cells (with their original text) and suffix.
fn parse_sheet_xml(xml: &str, shared_strings: &[String]) -> Result<ParsedSheet, SheetError> {
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut prefix: Option<String> = None;
    let mut rows: BTreeMap<u32, RowXml> = BTreeMap::new();
    let mut row: Option<(usize, u32, RowXml)> = None;
    let mut cell: Option<CellScan> = None;
    let mut last_row = 0u32;
    let mut last_col: Option<u32> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| SheetError::Invalid(format!("worksheet XML: {e}")))?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Eof => {
                return Err(SheetError::Invalid("worksheet has no sheetData".into()));
            }
            Event::Start(ref e) if prefix.is_none() && e.name().as_ref() == b"sheetData" => {
                prefix = Some(xml[..end].to_string());
            }
            Event::Empty(ref e) if prefix.is_none() && e.name().as_ref() == b"sheetData" => {
                return Ok(ParsedSheet {
                    prefix: format!("{}<sheetData>", &xml[..start]),
                    suffix: format!("</sheetData>{}", &xml[end..]),
                    rows,
                });
            }
            Event::End(ref e) if e.name().as_ref() == b"sheetData" => {
                return Ok(ParsedSheet {
                    prefix: prefix.unwrap_or_default(),
                    suffix: xml[start..].to_string(),
                    rows,
                });
            }
            _ if prefix.is_none() => {}

            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"row" => {
                let attrs: Vec<(String, String)> = e
                    .attributes()
                    .flatten()
                    .map(|a| (String::from_utf8_lossy(a.key.as_ref()).to_string(), attr_value(&a)))
                    .collect();
                let r = attrs
                    .iter()
                    .find(|(k, _)| k == "r")
                    .and_then(|(_, v)| v.parse().ok())
                    .unwrap_or(last_row + 1);
                last_row = r;
                last_col = None;
                let row_xml = RowXml {
                    raw: None,
                    attrs,
                    cells: BTreeMap::new(),
                };
                if matches!(event, Event::Empty(_)) {
                    rows.insert(
                        r,
                        RowXml {
                            raw: Some(xml[start..end].to_string()),
                            ..row_xml
                        },
                    );
                } else {
                    row = Some((start, r, row_xml));
                }
            }
            Event::End(ref e) if e.name().as_ref() == b"row" => {
                if let Some((row_start, r, mut row_xml)) = row.take() {
                    row_xml.raw = Some(xml[row_start..end].to_string());
                    rows.insert(r, row_xml);
                }
            }

            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"c" => {
                let mut scan = CellScan {
                    start,
                    row: last_row,
                    col: last_col.map_or(0, |c| c + 1),
                    ..Default::default()
                };
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"r" => {
                            if let Some((r, c)) = parse_xlsx_cell_ref(&attr_value(&attr)) {
                                scan.row = r;
                                scan.col = c;
                            }
                        }
                        b"s" => scan.style = Some(attr_value(&attr)),
                        b"t" => scan.cell_type = Some(attr_value(&attr)),
                        _ => {}
                    }
                }
                last_col = Some(scan.col);
                if matches!(event, Event::Empty(_)) {
                    finish_cell(scan, &xml[start..end], shared_strings, &mut row);
                } else {
                    cell = Some(scan);
                }
            }
            Event::End(ref e) if e.name().as_ref() == b"c" => {
                if let Some(scan) = cell.take() {
                    let raw = &xml[scan.start..end];
                    finish_cell(scan, raw, shared_strings, &mut row);
                }
            }

            Event::Start(ref e) if cell.is_some() => {
                if let Some(scan) = cell.as_mut() {
                    match e.name().as_ref() {
                        b"v" => scan.in_v = true,
                        b"is" => scan.in_is = true,
                        b"t" if scan.in_is => scan.in_t = true,
                        _ => {}
                    }
                }
            }
            Event::End(ref e) if cell.is_some() => {
                if let Some(scan) = cell.as_mut() {
                    match e.name().as_ref() {
                        b"v" => scan.in_v = false,
                        b"is" => scan.in_is = false,
                        b"t" => scan.in_t = false,
                        _ => {}
                    }
                }
            }
            Event::Text(ref e) => {
                if let Some(scan) = cell.as_mut() {
                    let text = unescape_xml(&String::from_utf8_lossy(e.as_ref()));
                    if scan.in_v {
                        scan.value.push_str(&text);
                    } else if scan.in_t {
                        scan.inline.push_str(&text);
                    }
                }
            }
            Event::GeneralRef(ref e) => {
                if let Some(scan) = cell.as_mut() {
                    let text = resolve_entity(&String::from_utf8_lossy(e.as_ref()));
                    if scan.in_v {
                        scan.value.push_str(&text);
                    } else if scan.in_t {
                        scan.inline.push_str(&text);
                    }
                }
            }
            _ => {}
        }
    }
}

fn finish_cell(
    scan: CellScan,
    raw: &str,
    shared_strings: &[String],
    row: &mut Option<(usize, u32, RowXml)>,
) {
    let Some((_, r, row_xml)) = row.as_mut() else {
        return;
    };
    if scan.row != *r {
        log::warn!("cell outside its row ({} in row {r}), kept as-is", scan.row);
    }
    let text = resolve_cell_value(
        scan.cell_type.as_deref(),
        &scan.value,
        &scan.inline,
        shared_strings,
    );
    row_xml.cells.insert(
        scan.col,
        CellXml {
            raw: raw.to_string(),
            style: scan.style,
            text,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodepix_core::{Column, ColumnRole};
    use rust_xlsxwriter::Workbook;

    fn fixture(dir: &Path) -> PathBuf {
        let path = dir.join("handover.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().set_name("Nodes").unwrap();
        for (c, h) in ["Node name", "Crew", "File name Deployment", "Depth"].iter().enumerate() {
            sheet.write_string(0, c as u16, *h).unwrap();
        }
        let rows = [("1111", "kim & co", "", 31.5), ("1121", "lee", "stale.png", 29.0), ("1131", "ana", "", 30.25)];
        for (i, (node, crew, file, depth)) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, *node).unwrap();
            sheet.write_string(r, 1, *crew).unwrap();
            if !file.is_empty() {
                sheet.write_string(r, 2, *file).unwrap();
            }
            sheet.write_number(r, 3, *depth).unwrap();
        }
        let other = workbook.add_worksheet().set_name("Notes").unwrap();
        other.write_string(0, 0, "keep me").unwrap();
        workbook.save(&path).unwrap();
        path
    }

    fn export(names: &[&str]) -> Table {
        Table::from_rows(
            vec![
                Column::new("Node Name", ColumnRole::NodeName),
                Column::new("filename_dep", ColumnRole::Filename),
            ],
            names
                .iter()
                .map(|n| {
                    let file = (*n != "1121").then(|| Value::text(format!("{n}.png")));
                    vec![Some(Value::text(*n)), file]
                })
                .collect(),
        )
    }

    fn mapping() -> ColumnMapping {
        [("Node name", "Node Name"), ("File name Deployment", "filename_dep")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    fn read_all(path: &Path, sheet: &str) -> Vec<Vec<String>> {
        let mut workbook: Sheets<_> = open_workbook_auto(path).unwrap();
        let range = workbook.worksheet_range(sheet).unwrap();
        range
            .rows()
            .map(|r| r.iter().map(|d| d.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_read_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());
        assert_eq!(
            read_headers(&path).unwrap(),
            vec!["Node name", "Crew", "File name Deployment", "Depth"]
        );
    }

    #[test]
    fn test_open_reads_existing_cells() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = XlsxSheet::open(&fixture(dir.path())).unwrap();
        assert_eq!(sheet.data_row_count(), 3);
        assert_eq!(sheet.headers()[2], "File name Deployment");
        assert_eq!(sheet.cell_text(0, 1).as_deref(), Some("kim & co"));
        assert_eq!(sheet.cell_text(1, 2).as_deref(), Some("stale.png"));
        assert_eq!(sheet.cell_text(2, 3).as_deref(), Some("30.25"));
        assert_eq!(sheet.cell_text(0, 2), None);
    }

    #[test]
    fn test_untouched_sheet_serializes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());
        let file = File::open(&path).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();
        let original = read_zip_file(&mut archive, "xl/worksheets/sheet1.xml").unwrap();

        let sheet = XlsxSheet::open(&path).unwrap();
        assert_eq!(sheet.to_xml(), original);
    }

    #[test]
    fn test_sync_five_rows_into_three() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());
        let table = export(&["1111", "1121", "1131", "1141", "1151"]);

        let report = sync_workbook(&path, &mapping(), &table, SyncOptions::default()).unwrap();
        assert_eq!(report.rows_appended, 2);
        assert!(report.misaligned_rows.is_empty());

        let rows = read_all(&path, "Nodes");
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], vec!["Node name", "Crew", "File name Deployment", "Depth"]);
        assert_eq!(rows[1], vec!["1111", "kim & co", "1111.png", "31.5"]);
        // Null export value clears the stale file name; other columns untouched.
        assert_eq!(rows[2], vec!["1121", "lee", "", "29"]);
        assert_eq!(rows[3], vec!["1131", "ana", "1131.png", "30.25"]);
        assert_eq!(rows[4], vec!["1141", "", "1141.png", ""]);
        assert_eq!(rows[5], vec!["1151", "", "1151.png", ""]);

        assert_eq!(read_all(&path, "Notes"), vec![vec!["keep me".to_string()]]);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temporary file left behind");
    }

    #[test]
    fn test_misaligned_sheet_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());
        let before = std::fs::read(&path).unwrap();
        let table = export(&["1111", "1131", "1121"]);

        let err = sync_workbook(
            &path,
            &mapping(),
            &table,
            SyncOptions {
                require_alignment: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SheetError::Sync(ReconError::Misaligned { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_missing_workbook() {
        let err = sync_workbook(
            Path::new("/nonexistent/handover.xlsx"),
            &mapping(),
            &export(&["1"]),
            SyncOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SheetError::NotFound(_)));
        assert!(matches!(read_headers(Path::new("/nonexistent/x.xlsx")), Err(SheetError::NotFound(_))));
    }

    #[test]
    fn test_not_an_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.xlsx");
        std::fs::write(&path, "Node name,Crew\n").unwrap();
        assert!(matches!(XlsxSheet::open(&path), Err(SheetError::Invalid(_))));
    }

    #[test]
    fn test_timestamps_written_as_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());
        let mut sheet = XlsxSheet::open(&path).unwrap();
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_milli_opt(10, 20, 0, 500)
            .unwrap();
        sheet.write_cell(0, 2, &Value::Timestamp(ts));
        sheet.write_cell(1, 2, &Value::text("a<b>&c"));
        assert_eq!(sheet.cell_text(0, 2).as_deref(), Some("2024-05-01 10:20:00"));
        sheet.save().unwrap();

        let mut workbook: Sheets<_> = open_workbook_auto(&path).unwrap();
        let range = workbook.worksheet_range("Nodes").unwrap();
        let serial = match range.get_value((1, 2)) {
            Some(calamine::Data::DateTime(dt)) => dt.as_f64(),
            other => panic!("expected a date cell, got {other:?}"),
        };
        let expected = 45413.0 + (10.0 * 3600.0 + 20.0 * 60.0 + 0.5) / 86_400.0;
        assert!((serial - expected).abs() < 1e-9, "serial {serial}");
        assert_eq!(read_all(&path, "Nodes")[2][2], "a<b>&c");

        // a second timestamp reuses the date style added by the first
        let mut sheet = XlsxSheet::open(&path).unwrap();
        let style = sheet.rows[&2].cells[&2].style.clone();
        assert!(style.is_some());
        sheet.write_cell(2, 2, &Value::Timestamp(ts));
        assert_eq!(sheet.rows[&4].cells[&2].style, style);
        assert!(!sheet.styles_changed);
    }

    #[test]
    fn test_existing_cell_style_kept_for_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path());
        let mut sheet = XlsxSheet::open(&path).unwrap();
        sheet.rows.get_mut(&3).unwrap().cells.get_mut(&2).unwrap().style = Some("7".into());
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        sheet.write_cell(1, 2, &Value::Timestamp(ts));
        assert_eq!(sheet.rows[&3].cells[&2].raw, "<c r=\"C3\" s=\"7\"><v>45414.375</v></c>");
        assert!(!sheet.styles_changed);
    }

    #[test]
    fn test_excel_serial() {
        let day = |y, m, d| chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(excel_serial(&day(1899, 12, 30).and_hms_opt(0, 0, 0).unwrap()), 0.0);
        assert_eq!(excel_serial(&day(2024, 5, 1).and_hms_opt(0, 0, 0).unwrap()), 45413.0);
        assert_eq!(excel_serial(&day(2024, 5, 1).and_hms_opt(18, 0, 0).unwrap()), 45413.75);
    }

    #[test]
    fn test_date_xf_appended_once() {
        let styles = r#"<styleSheet><cellStyleXfs count="1"><xf numFmtId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0"/><xf numFmtId="14"><alignment horizontal="left"/></xf></cellXfs><cellStyles count="1"/></styleSheet>"#;
        let (index, patched) = date_xf(styles).unwrap();
        let patched = patched.unwrap();
        assert_eq!(index, 2);
        assert!(patched.contains(r#"<cellXfs count="3">"#));
        assert!(patched.contains(
            r#"<alignment horizontal="left"/></xf><xf numFmtId="22" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs>"#
        ));
        assert!(patched.contains(r#"<cellStyleXfs count="1">"#));

        assert_eq!(date_xf(&patched).unwrap(), (2, None));
        assert!(date_xf("<styleSheet><fonts/></styleSheet>").is_none());
    }

    #[test]
    fn test_cell_ref_helpers() {
        assert_eq!(col_to_letter(0), "A");
        assert_eq!(col_to_letter(27), "AB");
        assert_eq!(parse_xlsx_cell_ref("AB12"), Some((12, 27)));
        assert_eq!(parse_xlsx_cell_ref("12"), None);
        assert_eq!(resolve_entity("#38"), "&");
        assert_eq!(resolve_entity("#x3C"), "<");
    }
}
