use std::fmt;
use std::path::Path;

use nodepix_core::{parse_stamp, Column, ColumnRole, Table, Value};

use crate::config::{Field, FieldLayout, FilenameFormat};
use crate::extract::extract;

/// Raw Date/Time substrings must be as long as these samples to be parsed.
const DATE_SAMPLE: &str = "20240529";
const TIME_SAMPLE: &str = "143501";

/// Which photo set an evidence table was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvidenceSource {
    Deployment,
    Recovery,
}

impl EvidenceSource {
    /// Directory name the photos of this source live under.
    pub fn folder_name(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Recovery => "Recovery",
        }
    }

    /// Suffix appended to evidence columns after the merge.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Deployment => "_dep",
            Self::Recovery => "_rec",
        }
    }
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => write!(f, "deployment"),
            Self::Recovery => write!(f, "recovery"),
        }
    }
}

/// Column names of an evidence table, in order.
pub const EVIDENCE_COLUMNS: [&str; 7] = ["Line", "Point", "Index", "Bumper", "ROV", "filename", "Datetime"];

fn evidence_columns() -> Vec<Column> {
    vec![
        Column::new("Line", ColumnRole::Key),
        Column::new("Point", ColumnRole::Key),
        Column::new("Index", ColumnRole::Key),
        Column::new("Bumper", ColumnRole::BumperCode),
        Column::new("ROV", ColumnRole::RovAttribution),
        Column::new("filename", ColumnRole::Filename),
        Column::new("Datetime", ColumnRole::Timestamp),
    ]
}

/// Build one evidence table from a batch of photo paths.
///
/// One row per path, in input order. No paths gives a table with no columns.
pub fn build_evidence_table<P: AsRef<Path>>(
    files: &[P],
    layout: &FieldLayout,
    format: &FilenameFormat,
) -> Table {
    if files.is_empty() {
        return Table::empty();
    }

    let combined = format.combined();
    let date_len = DATE_SAMPLE.chars().count();
    let time_len = TIME_SAMPLE.chars().count();

    let mut table = Table::new(evidence_columns());
    let mut stamped = 0usize;

    for path in files {
        let path = path.as_ref();
        let mut fields = extract(&path.to_string_lossy(), layout);

        let date = fields.take(Field::Date).unwrap_or_default();
        let time = fields.take(Field::Time).unwrap_or_default();
        let datetime = if date.chars().count() == date_len && time.chars().count() == time_len {
            parse_stamp(&format!("{date}{time}"), &combined).ok()
        } else {
            None
        };
        if datetime.is_some() {
            stamped += 1;
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        table.push_row(vec![
            fields.take(Field::Line).map(Value::Text),
            fields.take(Field::Point).map(Value::Text),
            fields.take(Field::Index).map(Value::Text),
            fields.take(Field::Bumper).map(Value::Text),
            fields.take(Field::Rov).map(Value::Text),
            Some(Value::Text(filename)),
            datetime.map(Value::Timestamp),
        ]);
    }

    log::debug!(
        "evidence table: {} rows, {} with a parsed timestamp",
        table.row_count(),
        stamped
    );
    table
}
