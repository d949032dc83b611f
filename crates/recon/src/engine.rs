use crate::config::ProjectConfig;
use crate::error::ReconError;
use crate::merge::reconcile;
use crate::model::{ExportMeta, ExportResult, ReconInput, ReconSummary};
use crate::quality::annotate;

/// Rebuild the export table from scratch and annotate it.
///
/// The events table is first cut down to the configured mandatory columns
/// that it actually has.
pub fn run(config: &ProjectConfig, input: &ReconInput) -> Result<ExportResult, ReconError> {
    let events = input.events.project(&config.mandatory_columns);
    if events.column_names().count() < input.events.column_names().count() {
        log::debug!(
            "events: kept {} of {} columns",
            events.column_names().count(),
            input.events.column_names().count()
        );
    }

    let table = reconcile(&events, &input.deployment, &input.recovery)?;
    let flags = annotate(&table, &config.quality);
    let summary = ReconSummary::compute(&table, &flags);

    log::info!(
        "export: {} rows ({} matched, {} unmatched), {} flag(s)",
        summary.rows,
        summary.matched,
        summary.unmatched,
        flags.len()
    );

    Ok(ExportResult {
        meta: ExportMeta {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        table,
        flags,
    })
}
