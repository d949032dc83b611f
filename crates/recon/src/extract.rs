//! Filename field extraction.
//!
//! A filename stem is cut into fields at fixed character offsets declared by a
//! [`FieldLayout`]. Extraction never fails: unusable layout entries yield
//! `None`, offsets past the end yield an empty string.

use std::path::Path;

use chrono::NaiveDateTime;
use nodepix_core::{parse_stamp, StampParse};

use crate::config::{Field, FieldLayout, FilenameFormat};
use crate::error::ReconError;

/// Largest plausible distance between a preview timestamp and now.
const PREVIEW_MAX_DAYS: i64 = 365 * 10;

/// Field values cut from one filename, indexed by [`Field`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    values: [Option<String>; 7],
}

impl ExtractedFields {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.values[slot(field)].as_deref()
    }

    pub fn take(&mut self, field: Field) -> Option<String> {
        self.values[slot(field)].take()
    }

    fn set(&mut self, field: Field, value: Option<String>) {
        self.values[slot(field)] = value;
    }
}

fn slot(field: Field) -> usize {
    field as usize
}

/// Filename without directory and without extension.
pub fn base_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Characters `start..start+length` of `base`, clipped to its length.
pub fn cut(base: &str, start: usize, length: usize) -> String {
    base.chars().skip(start).take(length).collect()
}

/// Cut every declared field out of `filename`.
pub fn extract(filename: &str, layout: &FieldLayout) -> ExtractedFields {
    let base = base_name(filename);
    let mut fields = ExtractedFields::default();
    for field in Field::ALL {
        let value = layout.get(field).map(|(start, length)| cut(&base, start, length));
        fields.set(field, value);
    }
    fields
}

/// Parse `Date + Time` substrings with the combined filename format.
///
/// Missing layout entries contribute empty strings, so the result is then
/// `Blank` or `Invalid`; never an error.
pub fn extract_datetime(filename: &str, layout: &FieldLayout, format: &FilenameFormat) -> StampParse {
    let fields = extract(filename, layout);
    let date = fields.get(Field::Date).unwrap_or("");
    let time = fields.get(Field::Time).unwrap_or("");
    parse_stamp(&format!("{date}{time}"), &format.combined())
}

/// Sanity-check a layout against a sample filename.
///
/// Used when an operator edits the layout; batch processing never calls it.
pub fn preview(
    sample: &str,
    layout: &FieldLayout,
    format: &FilenameFormat,
    now: NaiveDateTime,
) -> Result<NaiveDateTime, ReconError> {
    layout.validate()?;
    let sample_base = base_name(sample);
    let parsed = extract_datetime(sample, layout, format)
        .ok()
        .ok_or_else(|| ReconError::PreviewUnparseable {
            sample: sample_base.clone(),
        })?;
    if (parsed - now).num_seconds().abs() > PREVIEW_MAX_DAYS * 86_400 {
        return Err(ReconError::PreviewOutOfRange {
            sample: sample_base,
            parsed: parsed.format("%Y-%m-%d %H:%M:%S").to_string(),
        });
    }
    Ok(parsed)
}
