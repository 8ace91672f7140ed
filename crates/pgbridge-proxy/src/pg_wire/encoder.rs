//! Result row encoding
//!
//! Resolves the effective per-column format from a Bind's result-format
//! vector and renders each cell accordingly. Format resolution follows the
//! protocol's broadcast rule: an empty vector means all-text, a length-1
//! vector applies its single code to every column (not just the first), and
//! otherwise the vector must name every column.

use pgbridge_common::config::TextFormat;
use pgbridge_common::{BridgeError, Result};

use super::protocol::backend::FieldDescription;
use crate::value::{ColumnMetadata, Row};

/// Effective rendering for one column of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// PostgreSQL canonical text
    PgText,
    /// PostgreSQL binary
    PgBinary,
    /// The downstream service's text rendering, verbatim
    NativeText,
}

impl DataFormat {
    /// Format code announced on the wire (RowDescription field).
    pub fn wire_code(self) -> i16 {
        match self {
            DataFormat::PgBinary => 1,
            _ => 0,
        }
    }

    /// Map a wire format code through the session's text-format default.
    fn from_code(code: i16, text_format: TextFormat) -> Result<Self> {
        match code {
            0 => Ok(match text_format {
                TextFormat::Postgresql => DataFormat::PgText,
                TextFormat::Spanner => DataFormat::NativeText,
            }),
            1 => Ok(DataFormat::PgBinary),
            other => Err(BridgeError::protocol(format!("invalid format code {other}"))),
        }
    }
}

/// Resolve the per-column formats for a result set in extended query mode.
pub fn resolve_result_formats(
    codes: &[i16],
    column_count: usize,
    text_format: TextFormat,
    force_binary: bool,
) -> Result<Vec<DataFormat>> {
    match codes.len() {
        0 => {
            let format = if force_binary {
                DataFormat::PgBinary
            } else {
                DataFormat::from_code(0, text_format)?
            };
            Ok(vec![format; column_count])
        }
        1 => Ok(vec![DataFormat::from_code(codes[0], text_format)?; column_count]),
        n if n == column_count => codes
            .iter()
            .map(|&code| DataFormat::from_code(code, text_format))
            .collect(),
        n => Err(BridgeError::protocol(format!(
            "result format vector has {n} entries for {column_count} columns"
        ))),
    }
}

/// Simple query mode never carries format codes: every column is text.
pub fn simple_query_formats(column_count: usize, text_format: TextFormat) -> Vec<DataFormat> {
    let format = match text_format {
        TextFormat::Postgresql => DataFormat::PgText,
        TextFormat::Spanner => DataFormat::NativeText,
    };
    vec![format; column_count]
}

/// Resolve the format code for one Bind parameter under the same broadcast
/// rule, against the parameter count.
pub fn param_format_at(codes: &[i16], index: usize, param_count: usize) -> Result<i16> {
    match codes.len() {
        0 => Ok(0),
        1 => Ok(codes[0]),
        n if n == param_count => Ok(codes[index]),
        n => Err(BridgeError::protocol(format!(
            "parameter format vector has {n} entries for {param_count} parameters"
        ))),
    }
}

/// Encode one row under the resolved per-column formats.
pub fn encode_row(row: &Row, formats: &[DataFormat]) -> Result<Vec<Option<Vec<u8>>>> {
    if row.len() != formats.len() {
        return Err(BridgeError::protocol(format!(
            "row has {} columns, expected {}",
            row.len(),
            formats.len()
        )));
    }
    row.iter()
        .zip(formats)
        .map(|(cell, format)| match cell {
            None => Ok(None),
            Some(datum) => match format {
                DataFormat::PgText => Ok(Some(datum.pg_text().into_bytes())),
                DataFormat::NativeText => Ok(Some(datum.native_text().into_bytes())),
                DataFormat::PgBinary => {
                    let mut buf = Vec::new();
                    datum.pg_binary(&mut buf)?;
                    Ok(Some(buf))
                }
            },
        })
        .collect()
}

/// Build the RowDescription fields for a column set under resolved formats.
pub fn describe_columns(
    columns: &[ColumnMetadata],
    formats: &[DataFormat],
) -> Vec<FieldDescription> {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| FieldDescription {
            name: col.name.clone(),
            type_oid: col.ty.oid(),
            type_len: col.ty.type_len(),
            format: formats.get(i).map(|f| f.wire_code()).unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Datum, DatumType};

    #[test]
    fn test_empty_vector_means_all_text() {
        let formats = resolve_result_formats(&[], 3, TextFormat::Postgresql, false).unwrap();
        assert_eq!(formats, vec![DataFormat::PgText; 3]);
    }

    #[test]
    fn test_empty_vector_with_force_binary() {
        let formats = resolve_result_formats(&[], 2, TextFormat::Postgresql, true).unwrap();
        assert_eq!(formats, vec![DataFormat::PgBinary; 2]);
    }

    #[test]
    fn test_length_one_broadcasts_to_every_column() {
        // Not "first column binary, rest text" - all columns binary.
        let formats = resolve_result_formats(&[1], 3, TextFormat::Postgresql, false).unwrap();
        assert_eq!(formats, vec![DataFormat::PgBinary; 3]);
    }

    #[test]
    fn test_per_column_vector() {
        let formats = resolve_result_formats(&[0, 1], 2, TextFormat::Spanner, false).unwrap();
        assert_eq!(formats, vec![DataFormat::NativeText, DataFormat::PgBinary]);
    }

    #[test]
    fn test_mismatched_vector_is_protocol_error() {
        let err = resolve_result_formats(&[0, 1], 3, TextFormat::Postgresql, false).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn test_encode_row_mixed_formats() {
        let row: Row = vec![Some(Datum::Bool(true)), Some(Datum::Int4(7)), None];
        let cells = encode_row(
            &row,
            &[DataFormat::PgText, DataFormat::PgBinary, DataFormat::PgText],
        )
        .unwrap();
        assert_eq!(cells[0], Some(b"t".to_vec()));
        assert_eq!(cells[1], Some(7i32.to_be_bytes().to_vec()));
        assert_eq!(cells[2], None);
    }

    #[test]
    fn test_native_text_differs_from_pg_text() {
        let row: Row = vec![Some(Datum::Bool(false))];
        let native = encode_row(&row, &[DataFormat::NativeText]).unwrap();
        assert_eq!(native[0], Some(b"false".to_vec()));
    }

    #[test]
    fn test_describe_columns_reports_binary_code() {
        let columns = vec![ColumnMetadata::new("flag", DatumType::Bool)];
        let fields = describe_columns(&columns, &[DataFormat::PgBinary]);
        assert_eq!(fields[0].type_oid, 16);
        assert_eq!(fields[0].format, 1);
    }
}
