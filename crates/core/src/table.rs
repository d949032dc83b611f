use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

use crate::stamp::{format_stamp, parse_stamp_lenient};

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// A non-null cell value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Text(String),
    Timestamp(NaiveDateTime),
}

/// A nullable cell. `None` is the missing value (NaN/NaT in a dataframe).
pub type Cell = Option<Value>;

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// String form used for comparisons, joins and flat exports.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Timestamp(ts) => Cow::Owned(format_stamp(ts)),
        }
    }

    /// True for text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Timestamp(_) => false,
        }
    }

    /// Timestamp cells as-is; text cells parsed leniently.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            Self::Text(s) => parse_stamp_lenient(s).ok(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_text())
    }
}

/// True when the cell is null or blank text.
pub fn cell_is_blank(cell: &Cell) -> bool {
    cell.as_ref().map_or(true, Value::is_blank)
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Semantic role of a column, assigned when the column is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// One of the `Line` / `Point` / `Index` join keys.
    Key,
    NodeName,
    NodeCode,
    BumperCode,
    RovAttribution,
    Timestamp,
    Filename,
    Comment,
    Other,
}

impl ColumnRole {
    /// Role for a column of an externally supplied events table.
    ///
    /// Events columns arrive with free-form headers, so their role is decided
    /// once from the header when the table is loaded.
    pub fn for_event_column(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        match name {
            "Line" | "Point" | "Index" => Self::Key,
            "Node Name" => Self::NodeName,
            "NodeCode" => Self::NodeCode,
            _ if name.contains("Time") || name.contains("time") => Self::Timestamp,
            _ if lower.contains("bumper") => Self::BumperCode,
            _ if lower.contains("rov") => Self::RovAttribution,
            _ if lower.contains("comment") => Self::Comment,
            "filename" => Self::Filename,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub role: ColumnRole,
}

impl Column {
    pub fn new(name: impl Into<String>, role: ColumnRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Column-named table of nullable cells.
///
/// Rows always have exactly one cell per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(columns: Vec<Column>, rows: Vec<Vec<Cell>>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Append a row, padding with nulls or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Indices of all columns carrying `role`, in column order.
    pub fn columns_with_role(&self, role: ColumnRole) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.role == role)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// No rows (a table may still have columns).
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)?.as_ref()
    }

    pub fn into_parts(self) -> (Vec<Column>, Vec<Vec<Cell>>) {
        (self.columns, self.rows)
    }

    // -- Transformations (consume and return) --------------------------------

    /// Apply `f` to every cell of column `col`.
    pub fn map_column(mut self, col: usize, mut f: impl FnMut(Cell) -> Cell) -> Self {
        for row in &mut self.rows {
            let cell = row[col].take();
            row[col] = f(cell);
        }
        self
    }

    pub fn rename_column(mut self, col: usize, name: impl Into<String>) -> Self {
        self.columns[col].name = name.into();
        self
    }

    /// Insert a column at position `at`; `values` supplies one cell per row.
    pub fn insert_column(mut self, at: usize, column: Column, values: Vec<Cell>) -> Self {
        self.columns.insert(at, column);
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.insert(at, values.next().flatten());
        }
        self
    }

    /// Keep only the named columns, in the given order. Names that are not
    /// present are skipped, never synthesized.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let picks: Vec<usize> = names
            .iter()
            .filter_map(|n| self.column_index(n.as_ref()))
            .collect();
        let columns = picks.iter().map(|&i| self.columns[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| picks.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Self { columns, rows }
    }

    /// Stable ascending sort by the text of column `col`; nulls sort last.
    pub fn sort_by_column(mut self, col: usize) -> Self {
        self.rows.sort_by(|a, b| match (&a[col], &b[col]) {
            (Some(x), Some(y)) => x.as_text().cmp(&y.as_text()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Cell {
        Some(Value::text(s))
    }

    fn sample() -> Table {
        Table::from_rows(
            vec![
                Column::new("Line", ColumnRole::Key),
                Column::new("ROV", ColumnRole::RovAttribution),
            ],
            vec![vec![t("12"), t(" ROV2 ")], vec![t("03"), None]],
        )
    }

    #[test]
    fn push_row_pads_to_width() {
        let mut table = sample();
        table.push_row(vec![t("7")]);
        assert_eq!(table.rows()[2], vec![t("7"), None]);
    }

    #[test]
    fn project_skips_missing_and_reorders() {
        let table = sample().project(&["ROV", "Missing", "Line"]);
        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(names, vec!["ROV", "Line"]);
        assert_eq!(table.rows()[0], vec![t(" ROV2 "), t("12")]);
    }

    #[test]
    fn sort_is_stable_with_nulls_last() {
        let table = Table::from_rows(
            vec![
                Column::new("k", ColumnRole::Other),
                Column::new("tag", ColumnRole::Other),
            ],
            vec![
                vec![t("b"), t("1")],
                vec![None, t("2")],
                vec![t("a"), t("3")],
                vec![t("b"), t("4")],
            ],
        )
        .sort_by_column(0);
        let tags: Vec<_> = table.rows().iter().map(|r| r[1].clone()).collect();
        assert_eq!(tags, vec![t("3"), t("1"), t("4"), t("2")]);
    }

    #[test]
    fn insert_and_map_column() {
        let table = sample()
            .insert_column(0, Column::new("Node Name", ColumnRole::NodeName), vec![t("a"), t("b")])
            .map_column(2, |c| c.map(|v| Value::text(v.as_text().trim())));
        assert_eq!(table.cell(0, "Node Name"), Some(&Value::text("a")));
        assert_eq!(table.cell(0, "ROV"), Some(&Value::text("ROV2")));
        assert_eq!(table.cell(1, "ROV"), None);
    }

    #[test]
    fn event_column_roles() {
        assert_eq!(ColumnRole::for_event_column("Line"), ColumnRole::Key);
        assert_eq!(ColumnRole::for_event_column("Deployed by ROV"), ColumnRole::RovAttribution);
        assert_eq!(ColumnRole::for_event_column("Recovered Time"), ColumnRole::Timestamp);
        assert_eq!(ColumnRole::for_event_column("RecoveredComments"), ColumnRole::Comment);
        assert_eq!(ColumnRole::for_event_column("NodeCode"), ColumnRole::NodeCode);
        assert_eq!(ColumnRole::for_event_column("Depth"), ColumnRole::Other);
    }

    #[test]
    fn blank_cells() {
        assert!(cell_is_blank(&None));
        assert!(cell_is_blank(&t("  ")));
        assert!(!cell_is_blank(&t("x")));
    }
}
