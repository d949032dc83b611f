// nodepix CLI - node photo reconciliation, headless

mod exit_codes;
mod project;
mod scan;

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use nodepix_core::Table;
use nodepix_recon::extract::{extract, preview};
use nodepix_recon::{Field, FlagReason, SyncOptions};

use exit_codes::{
    recon_exit_code, sheet_exit_code, EXIT_ERROR, EXIT_FLAGS_FOUND, EXIT_IO, EXIT_SUCCESS,
    EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "nodepix")]
#[command(about = "Reconcile seabed node events with deployment/recovery photos")]
#[command(version)]
struct Cli {
    /// Project file (default: <config dir>/nodepix/project.toml if present)
    #[arg(long, global = true, env = "NODEPIX_CONFIG")]
    config: Option<PathBuf>,

    /// More logging (-v info, -vv debug). RUST_LOG overrides.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// The two inputs every reconciliation needs.
#[derive(Args)]
struct InputArgs {
    /// Events CSV (one row per logged node event)
    #[arg(long)]
    events: PathBuf,

    /// Pictures folder containing Deployment/ and Recovery/ directories
    #[arg(long)]
    pictures: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the filename layout against a sample photo name
    #[command(after_help = "\
Examples:
  nodepix preview 0012_0003_1_0001_01052024_102000_ROV2.png
  nodepix --config survey.toml preview Deployment/L12/0012_0003_1_0001_01052024_102000_ROV2.png")]
    Preview {
        /// Sample filename (directories and extension are ignored)
        sample: String,
    },

    /// Build the export table and write it as CSV
    #[command(after_help = "\
Examples:
  nodepix export --events events.csv --pictures ./pictures -o export.csv
  nodepix export --events events.csv --pictures ./pictures -o - --select 'Node Name,filename_dep'
  nodepix export --events events.csv --pictures ./pictures -o export.csv --json")]
    Export {
        #[command(flatten)]
        input: InputArgs,

        /// Output CSV (- for stdout)
        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Columns to write, comma-separated or repeated (default: all)
        #[arg(long, value_name = "COLS")]
        select: Vec<String>,

        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// List data-quality flags of the export table
    Flags {
        #[command(flatten)]
        input: InputArgs,

        /// Output JSON instead of one flag per line
        #[arg(long)]
        json: bool,

        /// Exit with a non-zero code when any flag is raised
        #[arg(long)]
        strict: bool,
    },

    /// Write mapped export columns into an existing spreadsheet, in place
    #[command(after_help = "\
The column mapping comes from [sync.mapping] in the project file.
The spreadsheet must be closed in other programs.

Examples:
  nodepix --config survey.toml sync --events events.csv --pictures ./pictures --sheet handover.xlsx")]
    Sync {
        #[command(flatten)]
        input: InputArgs,

        /// Existing .xlsx to update
        #[arg(long)]
        sheet: PathBuf,

        /// Refuse to write when sheet rows are not in export order
        #[arg(long)]
        require_alignment: bool,
    },

    /// Write the images report workbook
    Report {
        #[command(flatten)]
        input: InputArgs,

        /// Output .xlsx
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// List the header row of a spreadsheet
    Headers {
        /// .xlsx / .xls / .ods file
        file: PathBuf,

        /// Output JSON array
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Preview { sample } => cmd_preview(cli.config.as_deref(), &sample),
        Commands::Export {
            input,
            output,
            select,
            json,
        } => cmd_export(cli.config.as_deref(), &input, &output, &select, json),
        Commands::Flags { input, json, strict } => {
            cmd_flags(cli.config.as_deref(), &input, json, strict)
        }
        Commands::Sync {
            input,
            sheet,
            require_alignment,
        } => cmd_sync(cli.config.as_deref(), &input, &sheet, require_alignment),
        Commands::Report { input, output } => cmd_report(cli.config.as_deref(), &input, &output),
        Commands::Headers { file, json } => cmd_headers(&file, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            hint: None,
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_IO, msg)
    }

    /// Failure with no specific exit code (e.g. JSON serialization).
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<nodepix_io::SheetError> for CliError {
    fn from(err: nodepix_io::SheetError) -> Self {
        let code = sheet_exit_code(&err);
        let hint = match &err {
            nodepix_io::SheetError::Locked(_) => {
                Some("close the workbook in Excel (or clear its read-only flag) and retry".to_string())
            }
            nodepix_io::SheetError::Sync(nodepix_recon::ReconError::EmptyMapping) => {
                Some("add a [sync.mapping] table to the project file".to_string())
            }
            nodepix_io::SheetError::Sync(nodepix_recon::ReconError::Misaligned { .. }) => {
                Some("sort the sheet by node name or rerun without --require-alignment".to_string())
            }
            _ => None,
        };
        Self {
            code,
            message: err.to_string(),
            hint,
        }
    }
}

/// Split `--select` values on commas, dropping empties.
fn parse_selection(select: &[String]) -> Vec<String> {
    select
        .iter()
        .flat_map(|s| s.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Unknown `--select` names are warned about.
/// A selection naming no export column at all is a usage error.
fn check_selection(table: &Table, selection: &[String]) -> Result<(), CliError> {
    let missing: Vec<&String> = selection.iter().filter(|name| !table.has_column(name)).collect();
    if !selection.is_empty() && missing.len() == selection.len() {
        let known: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
        return Err(CliError::new(EXIT_USAGE, "--select matched no export column")
            .with_hint(format!("available columns: {}", known.join(", "))));
    }
    for name in missing {
        log::warn!("--select: export has no column '{name}'");
    }
    Ok(())
}

// ============================================================================
// preview
// ============================================================================

fn cmd_preview(config: Option<&Path>, sample: &str) -> Result<(), CliError> {
    let config = project::load_config(config)?;
    let now = chrono::Local::now().naive_local();
    let parsed = preview(sample, &config.layout, &config.filename, now)
        .map_err(|e| CliError::new(recon_exit_code(&e), e.to_string()))?;

    let fields = extract(sample, &config.layout);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for field in Field::ALL {
        if let Some(value) = fields.get(field) {
            writeln!(out, "{:<7} {}", field.name(), value).map_err(|e| CliError::io(e.to_string()))?;
        }
    }
    writeln!(out, "parsed  {}", parsed.format("%Y-%m-%d %H:%M:%S"))
        .map_err(|e| CliError::io(e.to_string()))?;
    Ok(())
}

// ============================================================================
// export
// ============================================================================

fn cmd_export(
    config: Option<&Path>,
    input: &InputArgs,
    output: &Path,
    select: &[String],
    json: bool,
) -> Result<(), CliError> {
    let config = project::load_config(config)?;
    let result = project::reconcile_inputs(&config, &input.events, &input.pictures)?;

    let selection = parse_selection(select);
    check_selection(&result.table, &selection)?;
    let selection = (!selection.is_empty()).then_some(selection.as_slice());

    let to_stdout = output.as_os_str() == "-";
    if to_stdout {
        nodepix_io::csv::write_export_to(&result.table, io::stdout().lock(), selection)
            .map_err(CliError::io)?;
    } else {
        nodepix_io::csv::write_export(&result.table, output, selection).map_err(CliError::io)?;
    }

    if json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", text);
    } else if !to_stdout {
        let s = &result.summary;
        eprintln!(
            "wrote {} rows to {} ({} matched, {} unmatched, {} flagged)",
            s.rows,
            output.display(),
            s.matched,
            s.unmatched,
            s.flagged_rows
        );
    }
    Ok(())
}

// ============================================================================
// flags
// ============================================================================

fn cmd_flags(config: Option<&Path>, input: &InputArgs, json: bool, strict: bool) -> Result<(), CliError> {
    let config = project::load_config(config)?;
    let result = project::reconcile_inputs(&config, &input.events, &input.pictures)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let text = serde_json::to_string_pretty(&result.flags)
            .map_err(|e| CliError::internal(e.to_string()))?;
        writeln!(out, "{}", text).map_err(|e| CliError::io(e.to_string()))?;
    } else {
        for flag in &result.flags {
            let node = result
                .table
                .cell(flag.row, nodepix_recon::merge::NODE_NAME)
                .map(|v| v.as_text().into_owned())
                .unwrap_or_default();
            writeln!(out, "{:>5}  {:<10} {:<18} {}", flag.row + 1, node, flag.column, flag.reason)
                .map_err(|e| CliError::io(e.to_string()))?;
        }
        for reason in FlagReason::ALL {
            let count = result.summary.flag_counts.get(&reason).copied().unwrap_or(0);
            if count > 0 {
                eprintln!("{reason}: {count}");
            }
        }
    }

    if strict && !result.flags.is_empty() {
        return Err(CliError::new(
            EXIT_FLAGS_FOUND,
            format!("{} flag(s) on {} row(s)", result.flags.len(), result.summary.flagged_rows),
        ));
    }
    Ok(())
}

// ============================================================================
// sync
// ============================================================================

fn cmd_sync(
    config: Option<&Path>,
    input: &InputArgs,
    sheet: &Path,
    require_alignment: bool,
) -> Result<(), CliError> {
    let config = project::load_config(config)?;
    let result = project::reconcile_inputs(&config, &input.events, &input.pictures)?;
    let options = SyncOptions {
        require_alignment: require_alignment || config.sync.require_alignment,
    };

    let report = nodepix_io::sync_workbook(sheet, &config.sync.mapping, &result.table, options)?;

    for pair in &report.skipped {
        eprintln!(
            "skipped '{}' <- '{}': {}",
            pair.sheet_column, pair.export_column, pair.reason
        );
    }
    if !report.misaligned_rows.is_empty() {
        eprintln!(
            "warning: {} sheet row(s) hold a different node than the export row written there",
            report.misaligned_rows.len()
        );
    }
    eprintln!(
        "updated {}: {} column(s), {} row(s) written, {} appended",
        sheet.display(),
        report.columns_written.len(),
        report.rows_written,
        report.rows_appended
    );
    Ok(())
}

// ============================================================================
// report
// ============================================================================

fn cmd_report(config: Option<&Path>, input: &InputArgs, output: &Path) -> Result<(), CliError> {
    let config = project::load_config(config)?;
    let result = project::reconcile_inputs(&config, &input.events, &input.pictures)?;

    let rows = nodepix_io::report::write_images_report(&result.table, output).map_err(CliError::io)?;
    eprintln!("wrote images report ({} rows) to {}", rows, output.display());
    Ok(())
}

// ============================================================================
// headers
// ============================================================================

fn cmd_headers(file: &Path, json: bool) -> Result<(), CliError> {
    let headers = nodepix_io::read_headers(file)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let text = serde_json::to_string(&headers)
            .map_err(|e| CliError::internal(e.to_string()))?;
        writeln!(out, "{}", text).map_err(|e| CliError::io(e.to_string()))?;
    } else {
        for header in &headers {
            // Headers may wrap inside their cell
            writeln!(out, "{}", header.replace('\n', "\\n")).map_err(|e| CliError::io(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_accepts_commas_and_repeats() {
        let select = vec!["Node Name, filename_dep".to_string(), "Datetime_dep".to_string(), ",".to_string()];
        assert_eq!(
            parse_selection(&select),
            vec!["Node Name", "filename_dep", "Datetime_dep"]
        );
    }

    #[test]
    fn selection_without_any_known_column_is_a_usage_error() {
        use nodepix_core::{Column, ColumnRole};

        let table = Table::from_rows(
            vec![
                Column::new("Node Name", ColumnRole::NodeName),
                Column::new("filename_dep", ColumnRole::Filename),
            ],
            Vec::new(),
        );
        let err = check_selection(&table, &["Bogus".to_string()]).unwrap_err();
        assert_eq!(err.code, EXIT_USAGE);
        assert!(err.hint.unwrap().contains("Node Name, filename_dep"));

        assert!(check_selection(&table, &["Bogus".to_string(), "Node Name".to_string()]).is_ok());
        assert!(check_selection(&table, &[]).is_ok());
    }

    #[test]
    fn internal_errors_use_the_general_code() {
        let err = CliError::internal("serialization failed");
        assert_eq!(err.code, EXIT_ERROR);
        assert_eq!(CliError::new(EXIT_IO, "x").hint, None);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn locked_sheet_error_carries_a_hint() {
        let err = CliError::from(nodepix_io::SheetError::Locked(PathBuf::from("h.xlsx")));
        assert_eq!(err.code, exit_codes::EXIT_SHEET_LOCKED);
        assert!(err.hint.is_some());
    }
}
