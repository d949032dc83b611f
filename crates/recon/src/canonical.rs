use nodepix_core::{ColumnRole, Table, Value};

use crate::merge::NODE_NAME;

/// Column order of the export table. Absent columns are skipped.
pub const CANONICAL_ORDER: [&str; 16] = [
    "Node Name",
    "NodeCode",
    "Bumper_dep",
    "Bumper_rec",
    "Deployed by ROV",
    "ROV_dep",
    "Recovered by ROV",
    "ROV_rec",
    "Aslaid Time",
    "Datetime_dep",
    "Recovered Time",
    "Datetime_rec",
    "filename_dep",
    "filename_rec",
    "DeployedComments",
    "RecoveredComments",
];

/// Clean up values, reorder columns and sort rows by node name.
pub fn canonicalize(table: Table) -> Table {
    let table = clean_node_codes(table);
    let table = strip_bumper_zeros(table);
    let table = table.project(&CANONICAL_ORDER);
    match table.column_index(NODE_NAME) {
        Some(col) => table.sort_by_column(col),
        None => table,
    }
}

/// Node codes are compared without any spaces.
fn clean_node_codes(table: Table) -> Table {
    table
        .columns_with_role(ColumnRole::NodeCode)
        .into_iter()
        .fold(table, |t, col| {
            t.map_column(col, |cell| {
                cell.map(|v| Value::text(v.as_text().trim().replace(' ', "")))
            })
        })
}

/// Remove leading zeros from bumper codes; "0000" becomes "".
fn strip_bumper_zeros(table: Table) -> Table {
    table
        .columns_with_role(ColumnRole::BumperCode)
        .into_iter()
        .fold(table, |t, col| {
            t.map_column(col, |cell| {
                cell.map(|v| Value::text(v.as_text().trim_start_matches('0')))
            })
        })
}
