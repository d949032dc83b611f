use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::ReconError;

/// Spreadsheet column name → export column name.
pub type ColumnMapping = BTreeMap<String, String>;

pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%f";
pub const DEFAULT_DATE_FORMAT: &str = "%d%m%Y";
pub const DEFAULT_TIME_FORMAT: &str = "%H%M%S";
pub const DEFAULT_DRIFT_MINUTES: i64 = 15;

pub const DEFAULT_MANDATORY_COLUMNS: &[&str] = &[
    "Line",
    "Point",
    "NodeCode",
    "Index",
    "Aslaid Time",
    "Recovered Time",
    "Deployed by ROV",
    "Recovered by ROV",
    "DeployedComments",
    "RecoveredComments",
];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Everything one reconciliation run needs, passed explicitly into each call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Format of the time columns in the events CSV.
    pub datetime_format: String,
    /// Events columns that always survive into the merge.
    pub mandatory_columns: Vec<String>,
    pub filename: FilenameFormat,
    pub layout: FieldLayout,
    pub quality: QualityConfig,
    pub sync: SyncConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            datetime_format: DEFAULT_DATETIME_FORMAT.into(),
            mandatory_columns: DEFAULT_MANDATORY_COLUMNS.iter().map(|c| c.to_string()).collect(),
            filename: FilenameFormat::default(),
            layout: FieldLayout::default(),
            quality: QualityConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Filename layout
// ---------------------------------------------------------------------------

/// The fields a filename layout can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Field {
    Line,
    Point,
    Index,
    Bumper,
    Date,
    Time,
    #[serde(rename = "ROV")]
    Rov,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Line,
        Field::Point,
        Field::Index,
        Field::Bumper,
        Field::Date,
        Field::Time,
        Field::Rov,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Line => "Line",
            Self::Point => "Point",
            Self::Index => "Index",
            Self::Bumper => "Bumper",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::Rov => "ROV",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Offset/length of one field inside the filename stem.
///
/// Both absent means the field is unused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldSpec {
    pub start: Option<i64>,
    pub length: Option<i64>,
}

impl FieldSpec {
    pub fn new(start: usize, length: usize) -> Self {
        Self {
            start: Some(start as i64),
            length: Some(length as i64),
        }
    }

    /// `(start, length)` when both are present and non-negative.
    pub fn usable(&self) -> Option<(usize, usize)> {
        match (self.start, self.length) {
            (Some(s), Some(l)) if s >= 0 && l >= 0 => Some((s as usize, l as usize)),
            _ => None,
        }
    }

    fn check(&self) -> Result<(), String> {
        match (self.start, self.length) {
            (None, None) => Ok(()),
            (Some(_), None) | (None, Some(_)) => {
                Err("start and length must be set together".into())
            }
            (Some(s), Some(_)) if s < 0 => Err(format!("start must be non-negative, got {s}")),
            (Some(_), Some(l)) if l <= 0 => Err(format!("length must be positive, got {l}")),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FieldLayout {
    fields: BTreeMap<Field, FieldSpec>,
}

impl FieldLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, field: Field, start: usize, length: usize) -> Self {
        self.fields.insert(field, FieldSpec::new(start, length));
        self
    }

    pub fn set_spec(&mut self, field: Field, spec: FieldSpec) {
        self.fields.insert(field, spec);
    }

    pub fn spec(&self, field: Field) -> FieldSpec {
        self.fields.get(&field).copied().unwrap_or_default()
    }

    /// `(start, length)` of a field, if it is declared and usable.
    pub fn get(&self, field: Field) -> Option<(usize, usize)> {
        self.spec(field).usable()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.values().all(|s| s.usable().is_none())
    }

    /// Reject half-specified, negative or zero-length entries.
    ///
    /// Batch extraction never calls this: unusable entries simply extract as
    /// null there.
    pub fn validate(&self) -> Result<(), ReconError> {
        for (field, spec) in &self.fields {
            spec.check().map_err(|reason| ReconError::LayoutInvalid {
                field: field.name().into(),
                reason,
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filename datetime format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilenameFormat {
    pub date_format: String,
    pub time_format: String,
}

impl Default for FilenameFormat {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.into(),
            time_format: DEFAULT_TIME_FORMAT.into(),
        }
    }
}

impl FilenameFormat {
    /// Format used to parse `Date + Time`.
    pub fn combined(&self) -> String {
        format!("{}{}", self.date_format, self.time_format)
    }
}

// ---------------------------------------------------------------------------
// Quality + Sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    /// Largest tolerated gap between a logged time and a photo time.
    pub drift_minutes: i64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            drift_minutes: DEFAULT_DRIFT_MINUTES,
        }
    }
}

impl QualityConfig {
    /// Threshold as a duration; out-of-range values saturate (rejected by `validate`).
    pub fn drift_threshold(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.drift_minutes).unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub mapping: ColumnMapping,
    /// Abort instead of warn when existing sheet rows are out of order.
    pub require_alignment: bool,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ProjectConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ProjectConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.datetime_format.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "datetime_format must not be empty".into(),
            ));
        }
        if self.filename.date_format.trim().is_empty() || self.filename.time_format.trim().is_empty()
        {
            return Err(ReconError::ConfigValidation(
                "filename date_format and time_format must not be empty".into(),
            ));
        }
        if self.quality.drift_minutes < 0 {
            return Err(ReconError::ConfigValidation(format!(
                "quality.drift_minutes must be non-negative, got {}",
                self.quality.drift_minutes
            )));
        }
        if chrono::Duration::try_minutes(self.quality.drift_minutes).is_none() {
            return Err(ReconError::ConfigValidation(format!(
                "quality.drift_minutes is out of range, got {}",
                self.quality.drift_minutes
            )));
        }
        self.layout.validate()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
