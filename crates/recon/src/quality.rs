//! Data-quality rules over the export table.
//!
//! Every rule reads the table and emits flags; none of them touches a value.
//! Rules whose columns are absent from the table are skipped.

use std::collections::HashMap;
use std::fmt;

use nodepix_core::{cell_is_blank, Cell, Table};
use serde::Serialize;

use crate::config::QualityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    RovMismatch,
    DuplicateNodeName,
    BumperMismatchDeployment,
    BumperMismatchRecovery,
    TimestampDriftDeployment,
    TimestampDriftRecovery,
}

impl FlagReason {
    pub const ALL: [FlagReason; 6] = [
        FlagReason::RovMismatch,
        FlagReason::DuplicateNodeName,
        FlagReason::BumperMismatchDeployment,
        FlagReason::BumperMismatchRecovery,
        FlagReason::TimestampDriftDeployment,
        FlagReason::TimestampDriftRecovery,
    ];
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RovMismatch => "ROV mismatch",
            Self::DuplicateNodeName => "duplicate node name",
            Self::BumperMismatchDeployment => "deployment bumper differs from node code",
            Self::BumperMismatchRecovery => "recovery bumper differs from node code",
            Self::TimestampDriftDeployment => "deployment photo time drift",
            Self::TimestampDriftRecovery => "recovery photo time drift",
        };
        f.write_str(s)
    }
}

/// One flagged cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityFlag {
    pub row: usize,
    pub column: String,
    pub reason: FlagReason,
}

/// Run every rule; flags come out ordered by row, then column position.
pub fn annotate(table: &Table, config: &QualityConfig) -> Vec<QualityFlag> {
    let mut flags: Vec<(usize, usize, FlagReason)> = Vec::new();

    rov_mismatch(table, &mut flags);
    duplicate_node_names(table, &mut flags);
    bumper_mismatch(table, "Bumper_dep", FlagReason::BumperMismatchDeployment, false, &mut flags);
    bumper_mismatch(table, "Bumper_rec", FlagReason::BumperMismatchRecovery, true, &mut flags);
    let threshold = config.drift_threshold();
    timestamp_drift(
        table,
        ("Aslaid Time", "Datetime_dep"),
        threshold,
        FlagReason::TimestampDriftDeployment,
        &mut flags,
    );
    timestamp_drift(
        table,
        ("Recovered Time", "Datetime_rec"),
        threshold,
        FlagReason::TimestampDriftRecovery,
        &mut flags,
    );

    flags.sort();
    log::debug!("quality: {} flag(s) over {} rows", flags.len(), table.row_count());

    flags
        .into_iter()
        .map(|(row, col, reason)| QualityFlag {
            row,
            column: table.columns()[col].name.clone(),
            reason,
        })
        .collect()
}

fn column_pair(table: &Table, a: &str, b: &str) -> Option<(usize, usize)> {
    Some((table.column_index(a)?, table.column_index(b)?))
}

fn trimmed(cell: &Cell) -> Option<String> {
    cell.as_ref().map(|v| v.as_text().trim().to_string())
}

fn rov_mismatch(table: &Table, flags: &mut Vec<(usize, usize, FlagReason)>) {
    let Some((logged, photo)) = column_pair(table, "Deployed by ROV", "ROV_dep") else {
        return;
    };
    for (i, row) in table.rows().iter().enumerate() {
        if cell_is_blank(&row[logged]) {
            continue;
        }
        if trimmed(&row[logged]) != trimmed(&row[photo]) {
            flags.push((i, logged, FlagReason::RovMismatch));
            flags.push((i, photo, FlagReason::RovMismatch));
        }
    }
}

fn duplicate_node_names(table: &Table, flags: &mut Vec<(usize, usize, FlagReason)>) {
    let Some(col) = table.column_index("Node Name") else {
        return;
    };
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in table.rows() {
        if !cell_is_blank(&row[col]) {
            if let Some(name) = trimmed(&row[col]) {
                *counts.entry(name).or_default() += 1;
            }
        }
    }
    for (i, row) in table.rows().iter().enumerate() {
        let repeated = trimmed(&row[col])
            .filter(|n| !n.is_empty())
            .is_some_and(|n| counts.get(&n).copied().unwrap_or(0) > 1);
        if repeated {
            flags.push((i, col, FlagReason::DuplicateNodeName));
        }
    }
}

/// `Bumper_* != NodeCode`. A null bumper matches only a null node code.
fn bumper_mismatch(
    table: &Table,
    bumper: &str,
    reason: FlagReason,
    skip_blank: bool,
    flags: &mut Vec<(usize, usize, FlagReason)>,
) {
    let Some((bumper_col, code_col)) = column_pair(table, bumper, "NodeCode") else {
        return;
    };
    for (i, row) in table.rows().iter().enumerate() {
        if skip_blank && cell_is_blank(&row[bumper_col]) {
            continue;
        }
        let bumper_text = row[bumper_col].as_ref().map(|v| v.as_text());
        let code_text = row[code_col].as_ref().map(|v| v.as_text());
        if bumper_text != code_text {
            flags.push((i, bumper_col, reason));
        }
    }
}

fn timestamp_drift(
    table: &Table,
    (logged, photo): (&str, &str),
    threshold: chrono::Duration,
    reason: FlagReason,
    flags: &mut Vec<(usize, usize, FlagReason)>,
) {
    let Some((logged_col, photo_col)) = column_pair(table, logged, photo) else {
        return;
    };
    for (i, row) in table.rows().iter().enumerate() {
        let logged_at = row[logged_col].as_ref().and_then(|v| v.as_timestamp());
        let photo_at = row[photo_col].as_ref().and_then(|v| v.as_timestamp());
        if let (Some(a), Some(b)) = (logged_at, photo_at) {
            if (a - b).num_milliseconds().abs() > threshold.num_milliseconds() {
                flags.push((i, photo_col, reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use nodepix_core::{Column, ColumnRole, Value};

    fn t(s: &str) -> Cell {
        Some(Value::text(s))
    }

    fn at(h: u32, m: u32) -> Cell {
        Some(Value::Timestamp(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(h, m, 0).unwrap(),
        ))
    }

    fn table(columns: &[(&str, ColumnRole)], rows: Vec<Vec<Cell>>) -> Table {
        Table::from_rows(
            columns.iter().map(|(n, r)| Column::new(*n, *r)).collect(),
            rows,
        )
    }

    fn reasons(flags: &[QualityFlag]) -> Vec<(usize, &str, FlagReason)> {
        flags.iter().map(|f| (f.row, f.column.as_str(), f.reason)).collect()
    }

    #[test]
    fn rov_mismatch_flags_both_columns() {
        let tbl = table(
            &[
                ("Deployed by ROV", ColumnRole::RovAttribution),
                ("ROV_dep", ColumnRole::RovAttribution),
            ],
            vec![
                vec![t("ROV1"), t("ROV2")],
                vec![t("ROV1"), t("ROV1")],
                vec![t("  "), t("ROV1")],
                vec![t("ROV3"), None],
            ],
        );
        let flags = annotate(&tbl, &QualityConfig::default());
        assert_eq!(
            reasons(&flags),
            vec![
                (0, "Deployed by ROV", FlagReason::RovMismatch),
                (0, "ROV_dep", FlagReason::RovMismatch),
                (3, "Deployed by ROV", FlagReason::RovMismatch),
                (3, "ROV_dep", FlagReason::RovMismatch),
            ]
        );
    }

    #[test]
    fn duplicate_names_flag_every_occurrence() {
        let tbl = table(
            &[("Node Name", ColumnRole::NodeName)],
            vec![vec![t("1231")], vec![t("1231")], vec![t("1241")], vec![None], vec![None], vec![t("")], vec![t("")]],
        );
        let flags = annotate(&tbl, &QualityConfig::default());
        assert_eq!(
            reasons(&flags),
            vec![
                (0, "Node Name", FlagReason::DuplicateNodeName),
                (1, "Node Name", FlagReason::DuplicateNodeName),
            ]
        );
    }

    #[test]
    fn deployment_bumper_flags_blank_but_recovery_does_not() {
        let tbl = table(
            &[
                ("NodeCode", ColumnRole::NodeCode),
                ("Bumper_dep", ColumnRole::BumperCode),
                ("Bumper_rec", ColumnRole::BumperCode),
            ],
            vec![
                vec![t("A1"), t(""), t("")],
                vec![t("A1"), t("A1"), t("B7")],
                vec![None, None, None],
            ],
        );
        let flags = annotate(&tbl, &QualityConfig::default());
        assert_eq!(
            reasons(&flags),
            vec![
                (0, "Bumper_dep", FlagReason::BumperMismatchDeployment),
                (1, "Bumper_rec", FlagReason::BumperMismatchRecovery),
            ]
        );
    }

    #[test]
    fn drift_is_strictly_greater_than_threshold() {
        let tbl = table(
            &[
                ("Aslaid Time", ColumnRole::Timestamp),
                ("Datetime_dep", ColumnRole::Timestamp),
                ("Recovered Time", ColumnRole::Timestamp),
                ("Datetime_rec", ColumnRole::Timestamp),
            ],
            vec![
                vec![at(10, 0), at(10, 15), at(12, 0), at(11, 44)],
                vec![at(10, 0), at(10, 20), None, at(11, 0)],
                vec![t("2024-05-01 10:00:00"), at(10, 30), t("garbage"), at(9, 0)],
            ],
        );
        let flags = annotate(&tbl, &QualityConfig::default());
        assert_eq!(
            reasons(&flags),
            vec![
                (0, "Datetime_rec", FlagReason::TimestampDriftRecovery),
                (1, "Datetime_dep", FlagReason::TimestampDriftDeployment),
                (2, "Datetime_dep", FlagReason::TimestampDriftDeployment),
            ]
        );
    }

    #[test]
    fn drift_threshold_is_configurable() {
        let tbl = table(
            &[
                ("Aslaid Time", ColumnRole::Timestamp),
                ("Datetime_dep", ColumnRole::Timestamp),
            ],
            vec![vec![at(10, 0), at(10, 20)]],
        );
        let config = QualityConfig { drift_minutes: 30 };
        assert!(annotate(&tbl, &config).is_empty());

        let unbounded = QualityConfig {
            drift_minutes: i64::MAX,
        };
        assert!(annotate(&tbl, &unbounded).is_empty());
    }

    #[test]
    fn absent_columns_skip_rules() {
        let tbl = table(&[("Depth", ColumnRole::Other)], vec![vec![t("3")]]);
        assert!(annotate(&tbl, &QualityConfig::default()).is_empty());
    }

    #[test]
    fn values_are_not_mutated() {
        let tbl = table(
            &[("Node Name", ColumnRole::NodeName)],
            vec![vec![t("1")], vec![t("1")]],
        );
        let before = tbl.clone();
        let _ = annotate(&tbl, &QualityConfig::default());
        assert_eq!(tbl, before);
    }
}
