use std::fmt;

/// Broad class of a failure, used by callers to decide how to report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad operator input (layout, formats, mapping). Fix the settings and rerun.
    Configuration,
    /// Input data that cannot be reconciled at all.
    Data,
    /// External resource unavailable (file locked, missing, unwritable).
    Resource,
}

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad format string, bad threshold, ...).
    ConfigValidation(String),
    /// A layout entry is half-specified, negative or zero-length.
    LayoutInvalid { field: String, reason: String },
    /// Preview sample did not yield a timestamp.
    PreviewUnparseable { sample: String },
    /// Preview timestamp is implausibly far from the current time.
    PreviewOutOfRange { sample: String, parsed: String },
    /// A non-empty input table lacks one of the join keys.
    MissingKeyColumn { table: String, column: String },
    /// Spreadsheet synchronization requested without any column mapping.
    EmptyMapping,
    /// Existing spreadsheet rows do not line up with the export rows.
    Misaligned { rows: Vec<usize> },
    /// IO error (file read, etc.).
    Io(String),
}

impl ReconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParse(_)
            | Self::ConfigValidation(_)
            | Self::LayoutInvalid { .. }
            | Self::PreviewUnparseable { .. }
            | Self::PreviewOutOfRange { .. }
            | Self::EmptyMapping => ErrorKind::Configuration,
            Self::MissingKeyColumn { .. } | Self::Misaligned { .. } => ErrorKind::Data,
            Self::Io(_) => ErrorKind::Resource,
        }
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::LayoutInvalid { field, reason } => {
                write!(f, "filename layout field '{field}': {reason}")
            }
            Self::PreviewUnparseable { sample } => {
                write!(f, "could not extract date/time from '{sample}' with current settings")
            }
            Self::PreviewOutOfRange { sample, parsed } => write!(
                f,
                "parsed date/time {parsed} from '{sample}' is more than 10 years from today"
            ),
            Self::MissingKeyColumn { table, column } => {
                write!(f, "{table} table: missing key column '{column}'")
            }
            Self::EmptyMapping => write!(f, "no spreadsheet column mapping provided"),
            Self::Misaligned { rows } => {
                let shown: Vec<String> = rows.iter().take(5).map(|r| r.to_string()).collect();
                write!(
                    f,
                    "{} spreadsheet row(s) do not match the export row order (rows {}{})",
                    rows.len(),
                    shown.join(", "),
                    if rows.len() > 5 { ", ..." } else { "" }
                )
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
