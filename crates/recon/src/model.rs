use std::collections::BTreeMap;

use nodepix_core::{cell_is_blank, Table};
use serde::Serialize;

use crate::quality::{FlagReason, QualityFlag};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// The three tables one reconciliation consumes.
#[derive(Debug, Clone, Default)]
pub struct ReconInput {
    pub events: Table,
    pub deployment: Table,
    pub recovery: Table,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconSummary {
    pub rows: usize,
    pub with_deployment_photo: usize,
    pub with_recovery_photo: usize,
    /// Rows with both a deployment and a recovery photo.
    pub matched: usize,
    pub unmatched: usize,
    pub flagged_rows: usize,
    pub flag_counts: BTreeMap<FlagReason, usize>,
}

impl ReconSummary {
    pub fn compute(table: &Table, flags: &[QualityFlag]) -> Self {
        let present = |name: &str, row: usize| -> bool {
            table
                .column_index(name)
                .is_some_and(|c| !cell_is_blank(&table.rows()[row][c]))
        };

        let mut summary = ReconSummary {
            rows: table.row_count(),
            ..Default::default()
        };
        for row in 0..table.row_count() {
            let dep = present("filename_dep", row);
            let rec = present("filename_rec", row);
            summary.with_deployment_photo += dep as usize;
            summary.with_recovery_photo += rec as usize;
            summary.matched += (dep && rec) as usize;
        }
        summary.unmatched = summary.rows - summary.matched;

        let mut flagged: Vec<usize> = flags.iter().map(|f| f.row).collect();
        flagged.dedup();
        summary.flagged_rows = flagged.len();
        for flag in flags {
            *summary.flag_counts.entry(flag.reason).or_default() += 1;
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportMeta {
    pub engine_version: String,
    pub run_at: String,
}

/// Export table plus everything derived from it in the same run.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub meta: ExportMeta,
    pub summary: ReconSummary,
    #[serde(skip)]
    pub table: Table,
    pub flags: Vec<QualityFlag>,
}
