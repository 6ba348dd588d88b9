//! Per-column value transformation applied to every batch before it is written.
//!
//! The DB2 driver reads through ODBC text buffers, so most values arrive as
//! `SqlValue::Text` in DB2's own spelling. Each value is coerced according to
//! the target column type:
//!
//! - NUL characters are stripped from text (PostgreSQL rejects them)
//! - `YYYY-MM-DD-HH.MM.SS.ffffff` timestamps and `HH.MM.SS` times are parsed
//! - hex text is decoded for `BYTEA` columns
//! - numerics become `rust_decimal` values when they fit in 28 digits and
//!   stay as checked plain text otherwise, so DECIMAL(31) and DECFLOAT(34)
//!   values reach COPY unrounded

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::core::{numeric_digits, plain_numeric, Row, SqlValue};
use crate::typemap::normalize_type;

/// Value domain of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Integer,
    Decimal,
    Float,
    Text,
    Binary,
    Date,
    Time,
    Timestamp,
}

impl ColumnKind {
    /// Classify a PostgreSQL type as rendered in the plan.
    pub fn from_target_type(target_type: &str) -> Self {
        let normalized = normalize_type(target_type);
        let base = normalized.split('(').next().unwrap_or("");
        match base {
            "BOOLEAN" | "BOOL" => ColumnKind::Boolean,
            "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "INT2" | "INT4" | "INT8" => {
                ColumnKind::Integer
            }
            "NUMERIC" | "DECIMAL" => ColumnKind::Decimal,
            "REAL" | "DOUBLE PRECISION" | "FLOAT4" | "FLOAT8" => ColumnKind::Float,
            "BYTEA" => ColumnKind::Binary,
            "DATE" => ColumnKind::Date,
            "TIME" => ColumnKind::Time,
            "TIMESTAMP" => ColumnKind::Timestamp,
            _ => ColumnKind::Text,
        }
    }
}

/// Coerce every value of `row` to its column kind.
///
/// The error names the column position and the offending value.
pub fn transform_row(row: Row, kinds: &[ColumnKind]) -> std::result::Result<Row, String> {
    if row.len() != kinds.len() {
        return Err(format!(
            "row has {} values but the table has {} columns",
            row.len(),
            kinds.len()
        ));
    }
    row.into_iter()
        .zip(kinds)
        .enumerate()
        .map(|(i, (value, kind))| {
            transform_value(value, *kind).map_err(|e| format!("column {}: {}", i + 1, e))
        })
        .collect()
}

/// Coerce one value.
pub fn transform_value(value: SqlValue, kind: ColumnKind) -> std::result::Result<SqlValue, String> {
    let value = match value {
        SqlValue::Text(s) if s.contains('\0') => SqlValue::Text(s.replace('\0', "")),
        other => other,
    };

    match (kind, value) {
        (_, SqlValue::Null) => Ok(SqlValue::Null),

        (ColumnKind::Text, SqlValue::Bytes(b)) => String::from_utf8(b)
            .map(|s| SqlValue::Text(s.replace('\0', "")))
            .map_err(|e| format!("invalid UTF-8 in text value: {}", e)),
        (ColumnKind::Text, v) => Ok(v),

        (ColumnKind::Integer, SqlValue::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(SqlValue::Int)
            .map_err(|_| format!("cannot convert {:?} to integer", s)),

        (ColumnKind::Decimal, SqlValue::Text(s)) => parse_numeric(&s),
        (ColumnKind::Decimal, SqlValue::Int(n)) => Ok(SqlValue::Decimal(Decimal::from(n))),
        (ColumnKind::Decimal, SqlValue::Float(f)) => Decimal::try_from(f)
            .map(SqlValue::Decimal)
            .map_err(|e| format!("cannot convert {} to numeric: {}", f, e)),

        (ColumnKind::Float, SqlValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(SqlValue::Float)
            .map_err(|_| format!("cannot convert {:?} to float", s)),
        (ColumnKind::Float, SqlValue::Int(n)) => Ok(SqlValue::Float(n as f64)),

        (ColumnKind::Boolean, SqlValue::Text(s)) => parse_bool(&s).map(SqlValue::Bool),
        (ColumnKind::Boolean, SqlValue::Int(n)) => Ok(SqlValue::Bool(n != 0)),

        (ColumnKind::Binary, SqlValue::Text(s)) => decode_hex(&s).map(SqlValue::Bytes),

        (ColumnKind::Date, SqlValue::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(SqlValue::Date)
            .map_err(|_| format!("cannot convert {:?} to date", s)),
        (ColumnKind::Time, SqlValue::Text(s)) => parse_time(&s).map(SqlValue::Time),
        (ColumnKind::Timestamp, SqlValue::Text(s)) => parse_timestamp(&s).map(SqlValue::Timestamp),

        (_, v) => Ok(v),
    }
}

/// Most digits (and largest scale) `Decimal` stores without rounding.
const DECIMAL_EXACT_DIGITS: usize = 28;

fn parse_numeric(s: &str) -> std::result::Result<SqlValue, String> {
    let plain = plain_numeric(s).ok_or_else(|| format!("cannot convert {:?} to numeric", s))?;
    if numeric_digits(&plain) <= DECIMAL_EXACT_DIGITS {
        if let Ok(d) = Decimal::from_str(&plain) {
            return Ok(SqlValue::Decimal(d));
        }
    }
    Ok(SqlValue::Numeric(plain))
}

fn parse_bool(s: &str) -> std::result::Result<bool, String> {
    match s.trim().to_ascii_uppercase().as_str() {
        "1" | "TRUE" | "T" | "Y" | "YES" => Ok(true),
        "0" | "FALSE" | "F" | "N" | "NO" => Ok(false),
        _ => Err(format!("cannot convert {:?} to boolean", s)),
    }
}

fn decode_hex(s: &str) -> std::result::Result<Vec<u8>, String> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("\\x")
        .or_else(|| trimmed.strip_prefix("0x"))
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| format!("invalid hex for binary column: {}", e))
}

/// `HH.MM.SS` (DB2) or `HH:MM:SS[.f]`.
fn parse_time(s: &str) -> std::result::Result<NaiveTime, String> {
    let trimmed = s.trim();
    NaiveTime::parse_from_str(trimmed, "%H.%M.%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f"))
        .map_err(|_| format!("cannot convert {:?} to time", s))
}

/// `YYYY-MM-DD-HH.MM.SS[.f]` (DB2) or `YYYY-MM-DD[ T]HH:MM:SS[.f]`.
/// Fractional digits beyond nanoseconds are dropped.
fn parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, String> {
    let trimmed = s.trim();
    let truncated = match trimmed.rfind('.') {
        Some(dot) if trimmed.len() - dot - 1 > 9 && trimmed[dot + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            &trimmed[..dot + 10]
        }
        _ => trimmed,
    };

    ["%Y-%m-%d-%H.%M.%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(truncated, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(truncated, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("cannot convert {:?} to timestamp", s))
}
