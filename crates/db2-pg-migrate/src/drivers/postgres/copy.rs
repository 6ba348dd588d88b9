//! Text-format COPY encoding.

use crate::core::{Row, SqlValue};

/// Encode `rows` as the body of `COPY ... FROM STDIN WITH (FORMAT text)`.
pub(crate) fn encode_rows(rows: &[Row]) -> String {
    let mut buf = String::with_capacity(rows.len() * 128);
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                buf.push('\t');
            }
            push_value(&mut buf, value);
        }
        buf.push('\n');
    }
    buf
}

fn push_value(buf: &mut String, value: &SqlValue) {
    match value {
        SqlValue::Null => buf.push_str("\\N"),
        SqlValue::Bool(b) => buf.push(if *b { 't' } else { 'f' }),
        SqlValue::Int(n) => buf.push_str(&n.to_string()),
        SqlValue::Float(f) if f.is_nan() => buf.push_str("NaN"),
        SqlValue::Float(f) if f.is_infinite() => {
            buf.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        SqlValue::Float(f) => buf.push_str(&format!("{:?}", f)),
        SqlValue::Decimal(d) => buf.push_str(&d.to_string()),
        SqlValue::Numeric(n) => buf.push_str(n),
        SqlValue::Text(s) => escape_copy_text(buf, s),
        // The bytea text form starts with a backslash, which COPY itself
        // escapes, hence the double backslash.
        SqlValue::Bytes(b) => {
            buf.push_str("\\\\x");
            buf.push_str(&hex::encode(b));
        }
        SqlValue::Date(d) => buf.push_str(&d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => buf.push_str(&t.format("%H:%M:%S%.f").to_string()),
        SqlValue::Timestamp(ts) => buf.push_str(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
    }
}

fn escape_copy_text(buf: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            _ => buf.push(c),
        }
    }
}
