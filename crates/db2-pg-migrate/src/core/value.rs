//! SQL value types for data transfer and comparison.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

/// A single column value moving between source and target.
///
/// Drivers that only speak text (ODBC text buffers, `::text` casts) produce
/// `Text`; the transfer transform turns those into typed values using the
/// target column type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    /// Exact decimal text in plain positional form, for values wider than
    /// `Decimal` holds (DB2 DECIMAL(31) and DECFLOAT(34)).
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

/// One row, in column order.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render as a PostgreSQL literal (no parameters).
    pub fn to_pg_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Float(n) if n.is_nan() => "'NaN'::float8".to_string(),
            SqlValue::Float(n) if n.is_infinite() => {
                if *n > 0.0 {
                    "'Infinity'::float8".to_string()
                } else {
                    "'-Infinity'::float8".to_string()
                }
            }
            SqlValue::Float(n) => format!("{:?}::float8", n),
            SqlValue::Decimal(d) => format!("{}::numeric", d),
            SqlValue::Numeric(n) => format!("'{}'::numeric", n),
            SqlValue::Text(s) => format!("'{}'", escape_sql_string(s)),
            SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
            SqlValue::Date(d) => format!("'{}'::date", d),
            SqlValue::Time(t) => format!("'{}'::time", t.format("%H:%M:%S%.6f")),
            SqlValue::Timestamp(ts) => {
                format!("'{}'::timestamp", ts.format("%Y-%m-%d %H:%M:%S%.6f"))
            }
        }
    }

    /// Short type label for mismatch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Numeric(_) => "numeric",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::Timestamp(_) => "timestamp",
        }
    }

    /// Comparable text of a numeric value: no leading or trailing zeros,
    /// no sign on zero. `None` for non-numeric variants.
    pub fn numeric_key(&self) -> Option<String> {
        match self {
            SqlValue::Decimal(d) => Some(canonical_numeric(&d.to_string())),
            SqlValue::Numeric(n) => Some(canonical_numeric(n)),
            _ => None,
        }
    }
}

/// Largest exponent accepted in scientific numeric text (DECFLOAT(34) range).
const MAX_NUMERIC_EXPONENT: u32 = 6176;

/// Rewrite decimal text (`-012.50`, `.5`, `1.5E+3`, `NaN`) in plain
/// positional form without rounding. Leading integer zeros are dropped;
/// fractional digits are kept as written. `None` if `s` is not a number.
pub fn plain_numeric(s: &str) -> Option<String> {
    let s = s.trim();
    let (negative, body) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    match body.to_ascii_uppercase().as_str() {
        "NAN" | "SNAN" => return Some("NaN".to_string()),
        "INFINITY" | "INF" if negative => return Some("-Infinity".to_string()),
        "INFINITY" | "INF" => return Some("Infinity".to_string()),
        _ => {}
    }

    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], body[i + 1..].parse::<i32>().ok()?),
        None => (body, 0),
    };
    if exponent.unsigned_abs() > MAX_NUMERIC_EXPONENT {
        return None;
    }
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", int_part, frac_part);
    let point = int_part.len() as i64 + exponent as i64;
    let (int_digits, frac_digits) = if point <= 0 {
        (String::new(), "0".repeat(point.unsigned_abs() as usize) + &digits)
    } else if point as usize >= digits.len() {
        let pad = point as usize - digits.len();
        (digits + &"0".repeat(pad), String::new())
    } else {
        let (i, f) = digits.split_at(point as usize);
        (i.to_string(), f.to_string())
    };

    let int_digits = int_digits.trim_start_matches('0');
    let mut out = String::with_capacity(int_digits.len() + frac_digits.len() + 3);
    if negative {
        out.push('-');
    }
    out.push_str(if int_digits.is_empty() { "0" } else { int_digits });
    if !frac_digits.is_empty() {
        out.push('.');
        out.push_str(&frac_digits);
    }
    Some(out)
}

/// Number of significant digits in plain numeric text, ignoring sign,
/// leading integer zeros and the decimal point.
pub fn numeric_digits(plain: &str) -> usize {
    let unsigned = plain.trim_start_matches(['-', '+']);
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    int_part.trim_start_matches('0').len() + frac_part.len()
}

fn canonical_numeric(plain: &str) -> String {
    let Some(plain) = plain_numeric(plain) else {
        return plain.to_string();
    };
    let trimmed = if plain.contains('.') {
        plain.trim_end_matches('0').trim_end_matches('.')
    } else {
        plain.as_str()
    };
    match trimmed {
        "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(n) => write!(f, "{}", n),
            SqlValue::Float(n) => write!(f, "{}", n),
            SqlValue::Decimal(d) => write!(f, "{}", d),
            SqlValue::Numeric(n) => write!(f, "{}", n),
            SqlValue::Text(s) => write!(f, "{:?}", s),
            SqlValue::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
            SqlValue::Date(d) => write!(f, "{}", d),
            SqlValue::Time(t) => write!(f, "{}", t),
            SqlValue::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Escape single quotes for a string literal.
pub fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert_eq!(SqlValue::Null.to_pg_literal(), "NULL");
        assert_eq!(SqlValue::Int(42).to_pg_literal(), "42");
        assert_eq!(SqlValue::from("O'Brien").to_pg_literal(), "'O''Brien'");
        assert_eq!(
            SqlValue::Bytes(vec![0xde, 0xad]).to_pg_literal(),
            "'\\xdead'::bytea"
        );
        assert_eq!(SqlValue::Float(1.5).to_pg_literal(), "1.5::float8");
        assert_eq!(SqlValue::Float(f64::NAN).to_pg_literal(), "'NaN'::float8");
    }

    #[test]
    fn test_timestamp_literal_keeps_microseconds() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 123456)
            .unwrap();
        assert_eq!(
            SqlValue::Timestamp(ts).to_pg_literal(),
            "'2024-01-02 03:04:05.123456'::timestamp"
        );
    }

    #[test]
    fn test_plain_numeric_keeps_every_digit() {
        assert_eq!(
            plain_numeric("1234567890123456789012345678901").as_deref(),
            Some("1234567890123456789012345678901")
        );
        assert_eq!(plain_numeric(" -012.50 ").as_deref(), Some("-12.50"));
        assert_eq!(plain_numeric(".5").as_deref(), Some("0.5"));
        assert_eq!(plain_numeric("1.5E-3").as_deref(), Some("0.0015"));
        assert_eq!(plain_numeric("1.5E+3").as_deref(), Some("1500"));
        assert_eq!(plain_numeric("-Infinity").as_deref(), Some("-Infinity"));
        assert_eq!(plain_numeric("snan").as_deref(), Some("NaN"));
        for bad in ["", "-", ".", "1.2.3", "12a", "1E", "1E99999", "--1"] {
            assert!(plain_numeric(bad).is_none(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_numeric_key_ignores_scale() {
        let wide = SqlValue::Numeric("0.123456789012345678901234567890".into());
        assert_eq!(
            wide.numeric_key().as_deref(),
            Some("0.12345678901234567890123456789")
        );
        assert_eq!(
            SqlValue::Decimal(Decimal::new(150, 2)).numeric_key(),
            SqlValue::Numeric("1.5".into()).numeric_key()
        );
        assert_eq!(SqlValue::Numeric("-0.000".into()).numeric_key().as_deref(), Some("0"));
        assert_eq!(numeric_digits("-0.0012"), 4);
        assert_eq!(numeric_digits("1234567890123456789012345678.9"), 29);
        assert!(SqlValue::Int(1).numeric_key().is_none());
    }

    #[test]
    fn test_numeric_literal_is_quoted() {
        assert_eq!(
            SqlValue::Numeric("NaN".into()).to_pg_literal(),
            "'NaN'::numeric"
        );
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i64> = None;
        assert!(SqlValue::from(none).is_null());
        assert_eq!(SqlValue::from(Some(7i64)), SqlValue::Int(7));
    }
}
