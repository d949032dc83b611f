// Timestamp parsing with strptime-style format strings.
//
// Formats are written in the conventional `%Y-%m-%d %H:%M:%S.%f` vocabulary.
// chrono understands almost all of it; the fractional-second directive is the
// exception and is rewritten before parsing.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Outcome of parsing one timestamp cell.
///
/// Parsing never fails loudly: callers decide whether `Blank` or `Invalid`
/// matters to them. Both collapse to a null cell in tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampParse {
    Parsed(NaiveDateTime),
    /// Input was empty or whitespace-only.
    Blank,
    /// Input was present but did not match the format.
    Invalid,
}

impl StampParse {
    pub fn ok(self) -> Option<NaiveDateTime> {
        match self {
            Self::Parsed(ts) => Some(ts),
            Self::Blank | Self::Invalid => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Formats tried, in order, when a cell holds text of unknown shape.
const LENIENT_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y%m%d%H%M%S",
];

/// Rewrite a strptime-style format into chrono's dialect.
///
/// `.%f` becomes `%.f` (optional fraction of any precision) and a bare `%f`
/// becomes `%6f` (microseconds, as strptime reads it).
pub fn to_chrono_format(format: &str) -> String {
    let mut out = String::with_capacity(format.len() + 2);
    let mut chars = format.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '.' if chars.peek() == Some(&'%') => {
                let mut lookahead = chars.clone();
                lookahead.next();
                if lookahead.next() == Some('f') {
                    chars.next();
                    chars.next();
                    out.push_str("%.f");
                } else {
                    out.push('.');
                }
            }
            '%' => match chars.next() {
                Some('f') => out.push_str("%6f"),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            },
            _ => out.push(ch),
        }
    }
    out
}

/// Parse `text` with a strptime-style `format`.
///
/// Date-only formats yield midnight of that day.
pub fn parse_stamp(text: &str, format: &str) -> StampParse {
    let text = text.trim();
    if text.is_empty() {
        return StampParse::Blank;
    }
    let format = to_chrono_format(format);
    if let Ok(ts) = NaiveDateTime::parse_from_str(text, &format) {
        return StampParse::Parsed(ts);
    }
    match NaiveDate::parse_from_str(text, &format) {
        Ok(date) => StampParse::Parsed(date.and_time(NaiveTime::MIN)),
        Err(_) => StampParse::Invalid,
    }
}

/// Parse text of unknown shape against a small set of ISO-like layouts.
pub fn parse_stamp_lenient(text: &str) -> StampParse {
    let text = text.trim();
    if text.is_empty() {
        return StampParse::Blank;
    }
    for format in LENIENT_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return StampParse::Parsed(ts);
        }
    }
    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => StampParse::Parsed(date.and_time(NaiveTime::MIN)),
        Err(_) => StampParse::Invalid,
    }
}

/// Render a timestamp the way flat exports show it: seconds precision, with
/// the fraction only when it is non-zero.
pub fn format_stamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}
