//! DB2 to PostgreSQL type rules.
//!
//! Rules are tried in the order they appear in [`RULES`]: every exact rule,
//! then every parametrized rule, then every prefix (approximate) rule. The
//! first rule that produces a mapping wins. Prefix rules always carry a
//! warning because they change the value domain in some way.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::TypeMapping;

/// Longest `VARCHAR(n)` / `CHAR(n)` PostgreSQL accepts.
const PG_MAX_CHAR_LENGTH: u32 = 10_485_760;

/// Render function for a parametrized rule. `None` means "does not apply",
/// and matching continues with the next rule.
pub(crate) type Render = fn(&Captures<'_>) -> Option<TypeMapping>;

/// Render function for a prefix rule, given the whole normalized type.
pub(crate) type Approximate = fn(&str) -> Option<TypeMapping>;

/// One tagged match rule.
pub(crate) enum Rule {
    /// Whole normalized type equals `source`.
    Exact {
        source: &'static str,
        target: &'static str,
    },
    /// Whole normalized type matches `pattern`; captured parameters feed `render`.
    Parametrized {
        name: &'static str,
        pattern: Regex,
        render: Render,
    },
    /// Normalized type starts with `prefix`; `render` must attach a warning.
    Prefix {
        prefix: &'static str,
        render: Approximate,
    },
}

impl Rule {
    pub(crate) fn apply(&self, normalized: &str) -> Option<TypeMapping> {
        match self {
            Rule::Exact { source, target } => {
                (normalized == *source).then(|| TypeMapping::lossless(*target))
            }
            Rule::Parametrized { pattern, render, .. } => {
                pattern.captures(normalized).and_then(|caps| render(&caps))
            }
            Rule::Prefix { prefix, render } => {
                if normalized.starts_with(prefix) {
                    render(normalized)
                } else {
                    None
                }
            }
        }
    }

    /// Label used in debug logs.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Rule::Exact { source, .. } => source,
            Rule::Parametrized { name, .. } => name,
            Rule::Prefix { prefix, .. } => prefix,
        }
    }
}

fn exact(source: &'static str, target: &'static str) -> Rule {
    Rule::Exact { source, target }
}

fn parametrized(name: &'static str, pattern: &str, render: Render) -> Rule {
    Rule::Parametrized {
        name,
        pattern: Regex::new(pattern).expect("Invalid type rule regex"),
        render,
    }
}

fn prefix(prefix: &'static str, render: Approximate) -> Rule {
    Rule::Prefix { prefix, render }
}

fn num(caps: &Captures<'_>, group: usize) -> Option<u32> {
    caps.get(group).and_then(|m| m.as_str().parse().ok())
}

/// The built-in rule table, in priority order.
pub(crate) static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // Exact
        exact("SMALLINT", "SMALLINT"),
        exact("INTEGER", "INTEGER"),
        exact("INT", "INTEGER"),
        exact("BIGINT", "BIGINT"),
        exact("REAL", "REAL"),
        exact("DOUBLE", "DOUBLE PRECISION"),
        exact("DOUBLE PRECISION", "DOUBLE PRECISION"),
        exact("FLOAT", "DOUBLE PRECISION"),
        // DB2 defaults an unparametrized DECIMAL to (5,0).
        exact("DECIMAL", "NUMERIC(5,0)"),
        exact("DEC", "NUMERIC(5,0)"),
        exact("NUMERIC", "NUMERIC(5,0)"),
        exact("NUM", "NUMERIC(5,0)"),
        exact("CHAR", "CHAR(1)"),
        exact("CHARACTER", "CHAR(1)"),
        exact("CLOB", "TEXT"),
        exact("CHARACTER LARGE OBJECT", "TEXT"),
        exact("DBCLOB", "TEXT"),
        exact("LONG VARCHAR", "TEXT"),
        exact("BLOB", "BYTEA"),
        exact("BINARY LARGE OBJECT", "BYTEA"),
        exact("BINARY", "BYTEA"),
        exact("VARBINARY", "BYTEA"),
        exact("LONG VARCHAR FOR BIT DATA", "BYTEA"),
        exact("DATE", "DATE"),
        exact("TIME", "TIME"),
        exact("TIMESTAMP", "TIMESTAMP"),
        exact("XML", "XML"),
        exact("BOOLEAN", "BOOLEAN"),
        // Parametrized
        parametrized(
            "DECIMAL(p,s)",
            r"^(?:DECIMAL|DEC|NUMERIC|NUM)\((\d+),(\d+)\)$",
            |caps| {
                let (p, s) = (num(caps, 1)?, num(caps, 2)?);
                ((1..=1000).contains(&p) && s <= p)
                    .then(|| TypeMapping::lossless(format!("NUMERIC({},{})", p, s)))
            },
        ),
        parametrized("DECIMAL(p)", r"^(?:DECIMAL|DEC|NUMERIC|NUM)\((\d+)\)$", |caps| {
            let p = num(caps, 1)?;
            (1..=1000).contains(&p).then(|| TypeMapping::lossless(format!("NUMERIC({},0)", p)))
        }),
        parametrized(
            "CHAR(n) FOR BIT DATA",
            r"^(?:CHAR|CHARACTER|VARCHAR|CHARACTER VARYING|CHAR VARYING)\(\d+\) FOR BIT DATA$",
            |_| Some(TypeMapping::lossless("BYTEA")),
        ),
        parametrized(
            "CHAR(n)",
            r"^(?:CHAR|CHARACTER)\((\d+)\)(?: FOR (?:SBCS|MIXED) DATA)?$",
            |caps| {
                let n = num(caps, 1)?;
                (1..=PG_MAX_CHAR_LENGTH).contains(&n)
                    .then(|| TypeMapping::lossless(format!("CHAR({})", n)))
            },
        ),
        parametrized(
            "VARCHAR(n)",
            r"^(?:VARCHAR|CHARACTER VARYING|CHAR VARYING)\((\d+)\)(?: FOR (?:SBCS|MIXED) DATA)?$",
            |caps| {
                let n = num(caps, 1)?;
                (1..=PG_MAX_CHAR_LENGTH).contains(&n)
                    .then(|| TypeMapping::lossless(format!("VARCHAR({})", n)))
            },
        ),
        parametrized("BINARY(n)", r"^(?:BINARY|VARBINARY)\(\d+\)$", |_| {
            Some(TypeMapping::lossless("BYTEA"))
        }),
        parametrized(
            "BLOB(n)",
            r"^(?:BLOB|BINARY LARGE OBJECT)\(\d+[KMG]?\)$",
            |_| Some(TypeMapping::lossless("BYTEA")),
        ),
        parametrized(
            "CLOB(n)",
            r"^(?:CLOB|CHARACTER LARGE OBJECT|DBCLOB)\(\d+[KMG]?\)$",
            |_| Some(TypeMapping::lossless("TEXT")),
        ),
        parametrized("TIMESTAMP(p)", r"^TIMESTAMP\((\d+)\)$", |caps| {
            let p = num(caps, 1)?;
            (p <= 6).then(|| TypeMapping::lossless(format!("TIMESTAMP({})", p)))
        }),
        parametrized("FLOAT(n)", r"^FLOAT\((\d+)\)$", |caps| {
            match num(caps, 1)? {
                1..=24 => Some(TypeMapping::lossless("REAL")),
                25..=53 => Some(TypeMapping::lossless("DOUBLE PRECISION")),
                _ => None,
            }
        }),
        // Prefix (approximate)
        prefix("LONG VARGRAPHIC", |source| {
            (source == "LONG VARGRAPHIC").then(|| {
                TypeMapping::lossy(
                    "TEXT",
                    "LONG VARGRAPHIC mapped to TEXT: double-byte length semantics are not preserved",
                )
            })
        }),
        prefix("VARGRAPHIC", |source| graphic(source, "VARGRAPHIC")),
        prefix("GRAPHIC", |source| graphic(source, "GRAPHIC")),
        prefix("DECFLOAT", |source| {
            static DECFLOAT: LazyLock<Regex> = LazyLock::new(|| {
                Regex::new(r"^DECFLOAT(?:\((16|34)\))?$").expect("Invalid regex")
            });
            DECFLOAT.is_match(source).then(|| {
                TypeMapping::lossy(
                    "NUMERIC",
                    format!(
                        "{} mapped to NUMERIC: decimal floating point special values (NaN, sNaN, Infinity) and exponent rounding are not preserved",
                        source
                    ),
                )
            })
        }),
        prefix("TIMESTAMP(", |source| {
            static TS: LazyLock<Regex> =
                LazyLock::new(|| Regex::new(r"^TIMESTAMP\((\d+)\)$").expect("Invalid regex"));
            let p: u32 = TS.captures(source)?.get(1)?.as_str().parse().ok()?;
            (7..=12).contains(&p).then(|| {
                TypeMapping::lossy(
                    "TIMESTAMP(6)",
                    format!(
                        "{} mapped to TIMESTAMP(6): fractional seconds beyond microseconds are truncated",
                        source
                    ),
                )
            })
        }),
        prefix("ROWID", |source| {
            (source == "ROWID").then(|| {
                TypeMapping::lossy(
                    "BYTEA",
                    "ROWID mapped to BYTEA: values are copied but no longer generated or unique",
                )
            })
        }),
    ]
});

/// `GRAPHIC(n)` / `VARGRAPHIC(n)` hold `n` double-byte characters; store them
/// as `VARCHAR(2n)` so the byte capacity is kept.
fn graphic(source: &str, base: &str) -> Option<TypeMapping> {
    let rest = source.strip_prefix(base)?;
    let n: u32 = if rest.is_empty() {
        1
    } else {
        rest.strip_prefix('(')?.strip_suffix(')')?.parse().ok()?
    };
    let doubled = n.checked_mul(2)?;
    if n == 0 || doubled > PG_MAX_CHAR_LENGTH {
        return None;
    }
    Some(TypeMapping::lossy(
        format!("VARCHAR({})", doubled),
        format!(
            "{} mapped to VARCHAR({}): double-byte width and Unicode padding semantics differ",
            source, doubled
        ),
    ))
}
