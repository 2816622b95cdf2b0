// 🧱 Cell - loosely typed spreadsheet / database value
//
// Source rows mix strings, numbers, dates and blanks in the same column.
// Every conversion here is total: malformed input degrades to an empty
// string or None, never to an error.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

/// Date layouts accepted from text cells, tried in order
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y.%m.%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日"];

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// String form used for comparisons and output; blanks become "".
    ///
    /// Whole floats render without a fractional part so that account numbers
    /// stored as numbers survive the trip ("6.222e15" never appears).
    pub fn to_normalized_string(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => format_float(*f),
            Cell::Bool(b) => b.to_string(),
            Cell::DateTime(dt) => {
                if dt.time() == chrono::NaiveTime::MIN {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
        }
    }

    /// Best-effort date parsing; None when the value is not a date.
    pub fn to_date_or_none(&self) -> Option<NaiveDate> {
        match self {
            Cell::DateTime(dt) => Some(dt.date()),
            Cell::Text(s) => parse_date_text(s),
            Cell::Int(i) => parse_date_text(&i.to_string()),
            Cell::Float(f) if f.fract() == 0.0 => parse_date_text(&format_float(*f)),
            _ => None,
        }
    }

    /// Numeric value; text is parsed leniently (thousands separators dropped).
    pub fn to_f64_or_none(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if f.is_finite() => Some(*f),
            Cell::Text(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
                cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_normalized_string())
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<calamine::Data> for Cell {
    fn from(value: calamine::Data) -> Self {
        use calamine::Data;

        match value {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) => Cell::Text(s),
            Data::Int(i) => Cell::Int(i),
            Data::Float(f) => Cell::Float(f),
            Data::Bool(b) => Cell::Bool(b),
            Data::DateTime(dt) => dt
                .as_datetime()
                .map(Cell::DateTime)
                .unwrap_or(Cell::Float(dt.as_f64())),
            Data::DateTimeIso(s) => parse_date_time_text(&s)
                .map(Cell::DateTime)
                .unwrap_or(Cell::Text(s)),
            Data::DurationIso(s) => Cell::Text(s),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        String::new()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.0}", f)
    } else {
        f.to_string()
    }
}

fn parse_date_time_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date_only(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_date_only(s: &str) -> Option<NaiveDate> {
    // Compact YYYYMMDD as exported by most bank systems
    if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(s, "%Y%m%d").ok();
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    parse_date_time_text(s).map(|dt| dt.date())
}

/// Format as YYYY.MM.DD, the layout used throughout the ledger
pub fn format_dotted(date: NaiveDate) -> String {
    date.format("%Y.%m.%d").to_string()
}
