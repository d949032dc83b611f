//! Three-way outer join of the events table with deployment and recovery
//! evidence, keyed on `(Line, Point, Index)`.

use std::collections::{BTreeMap, HashSet};

use nodepix_core::{Cell, Column, ColumnRole, Table, Value};

use crate::canonical::canonicalize;
use crate::error::ReconError;
use crate::evidence::EvidenceSource;

pub const KEY_COLUMNS: [&str; 3] = ["Line", "Point", "Index"];
pub const NODE_NAME: &str = "Node Name";

/// Evidence columns that receive a provenance suffix after each join.
const PROVENANCE_COLUMNS: [&str; 4] = ["Bumper", "ROV", "Datetime", "filename"];

/// Suffixes for non-key columns present on both sides of the first join.
const EVENT_DEPLOY_SUFFIXES: (&str, &str) = ("_event", "_deploy");

type JoinKey = [String; 3];

/// Build the export table: merge (steps 1–6) then canonicalize (steps 7–10).
pub fn reconcile(events: &Table, deployment: &Table, recovery: &Table) -> Result<Table, ReconError> {
    let merged = merge_sources(events, deployment, recovery)?;
    Ok(canonicalize(merged))
}

/// Join the three inputs without any cleanup beyond ROV trimming.
pub fn merge_sources(events: &Table, deployment: &Table, recovery: &Table) -> Result<Table, ReconError> {
    let counts = (events.row_count(), deployment.row_count(), recovery.row_count());
    let events = coerce_keys(events, "events")?;
    let deployment = coerce_keys(deployment, "deployment")?;
    let recovery = coerce_keys(recovery, "recovery")?;

    let left = match (events.is_empty(), deployment.is_empty()) {
        (false, false) => Some(outer_join(&events, &deployment, EVENT_DEPLOY_SUFFIXES)),
        (false, true) => Some(events),
        (true, false) => Some(deployment),
        (true, true) => None,
    };

    let merged = match left {
        Some(left) => {
            let left = insert_node_name(left);
            let left = trim_rov_columns(left);
            let left = add_provenance_suffix(left, EvidenceSource::Deployment);
            let joined = if recovery.is_empty() {
                left
            } else {
                let suffixes = (
                    EvidenceSource::Deployment.suffix(),
                    EvidenceSource::Recovery.suffix(),
                );
                outer_join(&left, &recovery, suffixes)
            };
            add_provenance_suffix(joined, EvidenceSource::Recovery)
        }
        None if !recovery.is_empty() => {
            let only = insert_node_name(recovery);
            add_provenance_suffix(only, EvidenceSource::Recovery)
        }
        None => return Ok(Table::empty()),
    };

    log::debug!(
        "merged {} events, {} deployment, {} recovery rows into {} rows",
        counts.0,
        counts.1,
        counts.2,
        merged.row_count()
    );
    Ok(merged)
}

/// Turn the key columns of a non-empty table into text; nulls become "".
fn coerce_keys(table: &Table, name: &str) -> Result<Table, ReconError> {
    if table.is_empty() {
        return Ok(table.clone());
    }
    let mut out = table.clone();
    for key in KEY_COLUMNS {
        let col = out.column_index(key).ok_or_else(|| ReconError::MissingKeyColumn {
            table: name.into(),
            column: key.into(),
        })?;
        out = out.map_column(col, |cell| {
            Some(Value::Text(cell.map(|v| v.as_text().into_owned()).unwrap_or_default()))
        });
    }
    Ok(out)
}

fn key_indices(table: &Table) -> [usize; 3] {
    // Callers only pass tables that went through `coerce_keys`.
    KEY_COLUMNS.map(|k| table.column_index(k).unwrap_or(0))
}

fn key_of(row: &[Cell], idx: &[usize; 3]) -> JoinKey {
    idx.map(|i| row[i].as_ref().map(|v| v.as_text().into_owned()).unwrap_or_default())
}

/// Full outer join on the three key columns.
///
/// Output columns: every left column, then the right non-key columns.
/// Non-key names present on both sides get `suffixes.0` / `suffixes.1`.
/// Rows come out ordered by key; a key present several times on both sides
/// yields every left×right combination.
fn outer_join(left: &Table, right: &Table, suffixes: (&str, &str)) -> Table {
    let left_keys = key_indices(left);
    let right_keys = key_indices(right);

    let left_names: HashSet<&str> = left.column_names().collect();
    let right_names: HashSet<&str> = right.column_names().collect();
    let collides = |name: &str| {
        !KEY_COLUMNS.contains(&name) && left_names.contains(name) && right_names.contains(name)
    };

    let mut columns: Vec<Column> = left
        .columns()
        .iter()
        .map(|c| {
            if collides(&c.name) {
                Column::new(format!("{}{}", c.name, suffixes.0), c.role)
            } else {
                c.clone()
            }
        })
        .collect();
    let right_payload: Vec<usize> = (0..right.columns().len())
        .filter(|i| !right_keys.contains(i))
        .collect();
    for &i in &right_payload {
        let c = &right.columns()[i];
        let name = if collides(&c.name) {
            format!("{}{}", c.name, suffixes.1)
        } else {
            c.name.clone()
        };
        columns.push(Column::new(name, c.role));
    }

    let mut groups: BTreeMap<JoinKey, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (i, row) in left.rows().iter().enumerate() {
        groups.entry(key_of(row, &left_keys)).or_default().0.push(i);
    }
    for (i, row) in right.rows().iter().enumerate() {
        groups.entry(key_of(row, &right_keys)).or_default().1.push(i);
    }

    let left_width = left.columns().len();
    let mut out = Table::new(columns);
    for (key, (lefts, rights)) in groups {
        let right_cells = |ri: usize| -> Vec<Cell> {
            right_payload.iter().map(|&c| right.rows()[ri][c].clone()).collect()
        };
        match (lefts.is_empty(), rights.is_empty()) {
            (false, false) => {
                for &li in &lefts {
                    for &ri in &rights {
                        let mut row = left.rows()[li].clone();
                        row.extend(right_cells(ri));
                        out.push_row(row);
                    }
                }
            }
            (false, true) => {
                for &li in &lefts {
                    out.push_row(left.rows()[li].clone());
                }
            }
            (true, false) => {
                for &ri in &rights {
                    let mut row: Vec<Cell> = vec![None; left_width];
                    for (k, &lk) in left_keys.iter().enumerate() {
                        row[lk] = Some(Value::Text(key[k].clone()));
                    }
                    row.extend(right_cells(ri));
                    out.push_row(row);
                }
            }
            (true, true) => {}
        }
    }
    out
}

/// Prepend `Node Name` = Line + Point + Index.
fn insert_node_name(table: Table) -> Table {
    let keys = key_indices(&table);
    let names: Vec<Cell> = table
        .rows()
        .iter()
        .map(|row| Some(Value::Text(key_of(row, &keys).concat())))
        .collect();
    table.insert_column(0, Column::new(NODE_NAME, ColumnRole::NodeName), names)
}

/// Trim surrounding whitespace of operator-entered ROV attributions.
fn trim_rov_columns(table: Table) -> Table {
    table
        .columns_with_role(ColumnRole::RovAttribution)
        .into_iter()
        .fold(table, |t, col| {
            t.map_column(col, |cell| match cell {
                Some(Value::Text(s)) => Some(Value::Text(s.trim().to_string())),
                other => other,
            })
        })
}

fn add_provenance_suffix(table: Table, source: EvidenceSource) -> Table {
    PROVENANCE_COLUMNS.iter().fold(table, |t, name| match t.column_index(name) {
        Some(col) => {
            let renamed = format!("{name}{}", source.suffix());
            t.rename_column(col, renamed)
        }
        None => t,
    })
}
