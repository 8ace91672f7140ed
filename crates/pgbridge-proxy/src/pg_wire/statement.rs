//! Prepared statements and portals
//!
//! A prepared statement is the rewritten SQL template plus its parsed
//! parameter count; a portal binds that template to actual parameter values
//! and result-format codes. Because the downstream executor consumes plain
//! SQL text, binding ultimately means substituting decoded values back into
//! the template.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;

use pgbridge_common::{BridgeError, Result};

use super::encoder::param_format_at;
use crate::executor::RowSet;

/// First whitespace-separated token, upper-cased. Forms the CommandComplete
/// tag and drives result-set expectations.
pub fn parse_command(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase()
}

/// Number of `$n` placeholders, taken as the highest index present so that a
/// repeated placeholder still counts once.
pub fn count_parameters(sql: &str) -> usize {
    static PLACEHOLDER: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| Regex::new(r"\$(\d+)").expect("valid pattern"));
    placeholder
        .captures_iter(sql)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

/// A named (or unnamed, empty-name) parsed SQL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub name: String,
    /// SQL as received from the client
    pub original_sql: String,
    /// SQL after the rewrite pipeline; this is what executes
    pub sql: String,
    /// Declared parameter type oids; may be shorter than `param_count`,
    /// missing entries are inferred (oid 0)
    pub param_types: Vec<u32>,
    pub param_count: usize,
    pub command: String,
}

impl PreparedStatement {
    pub fn new(name: String, original_sql: String, rewritten: String, param_types: Vec<u32>) -> Self {
        let command = parse_command(&rewritten);
        let param_count = count_parameters(&rewritten);
        Self {
            name,
            original_sql,
            sql: rewritten,
            param_types,
            param_count,
            command,
        }
    }

    /// Declared oid for a parameter, 0 when the client left it unspecified.
    pub fn param_type(&self, index: usize) -> u32 {
        self.param_types.get(index).copied().unwrap_or(0)
    }

    /// Parameter description announced for Describe('S'): one oid per
    /// parsed placeholder.
    pub fn describe_params(&self) -> Vec<u32> {
        (0..self.param_count).map(|i| self.param_type(i)).collect()
    }

    /// Whether executing this statement yields a result set.
    pub fn returns_rows(&self) -> bool {
        matches!(self.command.as_str(), "SELECT" | "WITH" | "VALUES" | "SHOW" | "FETCH")
    }

    /// CommandComplete tag. Row-producing commands report the number of rows
    /// the proxy actually emitted; DML reports the downstream update count.
    pub fn command_tag(&self, count: u64) -> String {
        match self.command.as_str() {
            "SELECT" | "FETCH" | "COPY" => format!("{} {count}", self.command),
            "INSERT" => format!("INSERT 0 {count}"),
            "UPDATE" | "DELETE" | "MERGE" => format!("{} {count}", self.command),
            _ => self.command.clone(),
        }
    }
}

/// Decode one Bind parameter into SQL-literal text.
///
/// Binary values are interpreted through the declared oid when one was
/// given, then a length heuristic; anything else is taken as UTF-8.
pub fn decode_parameter(
    raw: &Option<Vec<u8>>,
    format: i16,
    type_oid: u32,
) -> Result<Option<String>> {
    let Some(bytes) = raw else {
        return Ok(None);
    };
    if format == 0 {
        return Ok(Some(String::from_utf8_lossy(bytes).into_owned()));
    }
    if format != 1 {
        return Err(BridgeError::protocol(format!("invalid parameter format code {format}")));
    }

    let int_of = |bytes: &[u8]| -> Option<String> {
        match bytes.len() {
            2 => Some(i16::from_be_bytes(bytes.try_into().ok()?).to_string()),
            4 => Some(i32::from_be_bytes(bytes.try_into().ok()?).to_string()),
            8 => Some(i64::from_be_bytes(bytes.try_into().ok()?).to_string()),
            _ => None,
        }
    };

    let decoded = match type_oid {
        16 if bytes.len() == 1 => Some(if bytes[0] != 0 { "TRUE" } else { "FALSE" }.to_string()),
        20 | 21 | 23 => int_of(bytes),
        700 => bytes
            .as_slice()
            .try_into()
            .ok()
            .map(|b| f32::from_be_bytes(b).to_string()),
        701 => bytes
            .as_slice()
            .try_into()
            .ok()
            .map(|b| f64::from_be_bytes(b).to_string()),
        1082 => bytes.as_slice().try_into().ok().map(|b| {
            let days = i32::from_be_bytes(b);
            let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid epoch");
            (epoch + Duration::days(days as i64)).format("%Y-%m-%d").to_string()
        }),
        1184 => bytes.as_slice().try_into().ok().map(|b| {
            let micros = i64::from_be_bytes(b);
            let epoch: DateTime<Utc> = Utc
                .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
                .single()
                .expect("valid epoch");
            (epoch + Duration::microseconds(micros))
                .format("%Y-%m-%d %H:%M:%S%.6f+00")
                .to_string()
        }),
        // Unspecified oid: fall back to width
        0 => int_of(bytes),
        _ => None,
    };

    Ok(Some(decoded.unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())))
}

/// Substitute decoded parameter values into the SQL template, producing the
/// literal text handed downstream. Placeholders are replaced in descending
/// index order so `$1` never clobbers `$10`, and values are quoted unless
/// they are numeric or boolean literals.
pub fn substitute_parameters(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let replacement = match param {
            None => "NULL".to_string(),
            Some(value) => {
                if value.parse::<i64>().is_ok()
                    || value.parse::<f64>().is_ok()
                    || value.eq_ignore_ascii_case("true")
                    || value.eq_ignore_ascii_case("false")
                {
                    value.clone()
                } else {
                    format!("'{}'", value.replace('\'', "''"))
                }
            }
        };
        result = result.replace(&placeholder, &replacement);
    }
    result
}

/// Cached result of executing a portal, kept between Execute calls so a
/// suspended cursor resumes instead of rerunning the statement.
pub enum PortalExecution {
    Rows { set: RowSet, rows_sent: u64 },
    UpdateCount(u64),
}

/// A prepared statement bound to parameter values and result formats.
pub struct Portal {
    pub name: String,
    pub statement: Arc<PreparedStatement>,
    pub param_values: Vec<Option<Vec<u8>>>,
    pub param_formats: Vec<i16>,
    pub result_formats: Vec<i16>,
    pub execution: Option<PortalExecution>,
}

impl Portal {
    pub fn new(
        name: String,
        statement: Arc<PreparedStatement>,
        param_formats: Vec<i16>,
        param_values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    ) -> Self {
        Self {
            name,
            statement,
            param_values,
            param_formats,
            result_formats,
            execution: None,
        }
    }

    /// The SQL text to execute: the template with every placeholder replaced
    /// by its decoded bound value.
    pub fn bound_sql(&self) -> Result<String> {
        if self.param_values.is_empty() {
            return Ok(self.statement.sql.clone());
        }
        let count = self.param_values.len();
        let mut decoded = Vec::with_capacity(count);
        for (i, raw) in self.param_values.iter().enumerate() {
            let format = param_format_at(&self.param_formats, i, count)?;
            decoded.push(decode_parameter(raw, format, self.statement.param_type(i))?);
        }
        Ok(substitute_parameters(&self.statement.sql, &decoded))
    }
}
