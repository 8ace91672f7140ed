//! Typed value model for result rows
//!
//! The downstream executor hands back typed datums; the row encoder turns
//! them into wire bytes under one of three formats (PostgreSQL text,
//! PostgreSQL binary, or the service's native text rendering).

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use pgbridge_common::{BridgeError, Result};

/// Column type as reported by the downstream executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytes,
    Date,
    Timestamp,
    Array(Box<DatumType>),
}

impl DatumType {
    /// PostgreSQL type OID announced in RowDescription.
    /// Reference: pg_type.dat in the PostgreSQL catalog.
    pub fn oid(&self) -> u32 {
        match self {
            DatumType::Bool => 16,
            DatumType::Bytes => 17,
            DatumType::Int8 => 20,
            DatumType::Int2 => 21,
            DatumType::Int4 => 23,
            DatumType::Text => 25,
            DatumType::Float4 => 700,
            DatumType::Float8 => 701,
            DatumType::Date => 1082,
            DatumType::Timestamp => 1184,
            DatumType::Numeric => 1700,
            DatumType::Array(elem) => match **elem {
                DatumType::Bool => 1000,
                DatumType::Bytes => 1001,
                DatumType::Int2 => 1005,
                DatumType::Int4 => 1007,
                DatumType::Text => 1009,
                DatumType::Int8 => 1016,
                DatumType::Float4 => 1021,
                DatumType::Float8 => 1022,
                DatumType::Date => 1182,
                DatumType::Timestamp => 1185,
                DatumType::Numeric => 1231,
                // Nested arrays degrade to the text array oid
                DatumType::Array(_) => 1009,
            },
        }
    }

    /// Fixed size for fixed-length types, -1 for variable-length.
    pub fn type_len(&self) -> i16 {
        match self {
            DatumType::Bool => 1,
            DatumType::Int2 => 2,
            DatumType::Int4 | DatumType::Float4 | DatumType::Date => 4,
            DatumType::Int8 | DatumType::Float8 | DatumType::Timestamp => 8,
            _ => -1,
        }
    }
}

/// Column metadata attached to a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: DatumType,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, ty: DatumType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// One result cell. NULL is represented at the row level as `Option<Datum>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Datum {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Array(Vec<Option<Datum>>),
}

/// One result row.
pub type Row = Vec<Option<Datum>>;

/// Midnight of 2000-01-01, the PostgreSQL binary-format epoch.
fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

impl Datum {
    /// PostgreSQL canonical text form.
    ///
    /// Booleans become `t`/`f`, timestamps ISO 8601 with microsecond
    /// precision, arrays `{...}` with element quoting.
    pub fn pg_text(&self) -> String {
        match self {
            Datum::Bool(true) => "t".to_string(),
            Datum::Bool(false) => "f".to_string(),
            Datum::Int2(v) => v.to_string(),
            Datum::Int4(v) => v.to_string(),
            Datum::Int8(v) => v.to_string(),
            Datum::Float4(v) => v.to_string(),
            Datum::Float8(v) => v.to_string(),
            Datum::Numeric(v) | Datum::Text(v) => v.clone(),
            Datum::Bytes(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for b in v {
                    out.push_str(&format!("{b:02x}"));
                }
                out
            }
            Datum::Date(v) => v.format("%Y-%m-%d").to_string(),
            Datum::Timestamp(v) => v.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string(),
            Datum::Array(elems) => {
                let mut out = String::from("{");
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match elem {
                        None => out.push_str("NULL"),
                        Some(d) => out.push_str(&quote_array_element(&d.pg_text())),
                    }
                }
                out.push('}');
                out
            }
        }
    }

    /// The downstream service's own text rendering, used when the proxy runs
    /// with the native text format.
    pub fn native_text(&self) -> String {
        match self {
            Datum::Bool(v) => v.to_string(),
            Datum::Date(v) => v.format("%Y-%m-%d").to_string(),
            Datum::Timestamp(v) => v.to_rfc3339_opts(SecondsFormat::Micros, true),
            Datum::Array(elems) => {
                let mut out = String::from("[");
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    match elem {
                        None => out.push_str("NULL"),
                        Some(d) => out.push_str(&d.native_text()),
                    }
                }
                out.push(']');
                out
            }
            other => other.pg_text(),
        }
    }

    /// PostgreSQL binary format, appended to `buf`.
    ///
    /// Scalars only; arrays and numerics have no binary rendering here and
    /// yield an unsupported-type error.
    pub fn pg_binary(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Datum::Bool(v) => buf.push(*v as u8),
            Datum::Int2(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Datum::Int4(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Datum::Int8(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Datum::Float4(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Datum::Float8(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Datum::Text(v) => buf.extend_from_slice(v.as_bytes()),
            Datum::Bytes(v) => buf.extend_from_slice(v),
            Datum::Date(v) => {
                let days = v.num_days_from_ce() - pg_epoch_date().num_days_from_ce();
                buf.extend_from_slice(&days.to_be_bytes());
            }
            Datum::Timestamp(v) => {
                let epoch = Utc.from_utc_datetime(&pg_epoch_date().and_hms_opt(0, 0, 0).unwrap());
                let micros = (*v - epoch).num_microseconds().ok_or_else(|| {
                    BridgeError::unsupported("timestamp out of range for binary encoding")
                })?;
                buf.extend_from_slice(&micros.to_be_bytes());
            }
            Datum::Numeric(_) => {
                return Err(BridgeError::unsupported("binary format for numeric values"))
            }
            Datum::Array(_) => {
                return Err(BridgeError::unsupported("binary format for array values"))
            }
        }
        Ok(())
    }
}

/// Quote one array element for the `{...}` text form if it needs it.
fn quote_array_element(s: &str) -> String {
    let needs_quotes = s.is_empty()
        || s.eq_ignore_ascii_case("null")
        || s.chars().any(|c| {
            c.is_whitespace() || matches!(c, '{' | '}' | ',' | '"' | '\\')
        });
    if !needs_quotes {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
