//! Type mapping between DB2 and PostgreSQL.
//!
//! [`TypeMapper`] is a pure function over the normalized source type string:
//! user overrides first, then the built-in rule table in [`rules`], then the
//! optional configured fallback. Same input, same output, no interior state,
//! so one mapper is shared freely across workers.

mod rules;

use std::collections::BTreeMap;

use tracing::trace;

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};

use rules::RULES;

/// Result of mapping one source type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Target type string (e.g., "NUMERIC(10,2)", "VARCHAR(100)").
    pub target_type: String,
    /// Whether this mapping loses data, precision or semantics.
    pub is_lossy: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless type mapping.
    pub fn lossless(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy type mapping with a warning.
    pub fn lossy(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// DB2 to PostgreSQL type mapper.
#[derive(Debug, Clone, Default)]
pub struct TypeMapper {
    /// Normalized source type -> target type, tried before the built-in rules.
    overrides: BTreeMap<String, String>,
    /// Target type used, with a warning, when nothing else matches.
    fallback: Option<String>,
}

impl TypeMapper {
    /// Mapper with only the built-in rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper honoring `type_overrides` and `unsupported_type_fallback`.
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new()
            .with_overrides(config.type_overrides.clone())
            .with_fallback(config.unsupported_type_fallback.clone())
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides
            .into_iter()
            .map(|(source, target)| (normalize_type(&source), target.trim().to_string()))
            .collect();
        self
    }

    pub fn with_fallback(mut self, fallback: Option<String>) -> Self {
        self.fallback = fallback.map(|f| f.trim().to_string());
        self
    }

    /// Map a source type to its target type and optional warning.
    pub fn map(&self, source_type: &str) -> Result<TypeMapping> {
        let normalized = normalize_type(source_type);

        if let Some(target) = self.overrides.get(&normalized) {
            return Ok(TypeMapping::lossless(target.clone()));
        }

        for rule in RULES.iter() {
            if let Some(mapping) = rule.apply(&normalized) {
                trace!("{} matched rule {} -> {}", normalized, rule.label(), mapping.target_type);
                return Ok(mapping);
            }
        }

        match &self.fallback {
            Some(fallback) => Ok(TypeMapping::lossy(
                fallback.clone(),
                format!(
                    "{} has no mapping rule; using configured fallback {}",
                    normalized, fallback
                ),
            )),
            None => Err(MigrateError::UnsupportedType(normalized)),
        }
    }

    /// Map a source type, discarding any warning.
    pub fn convert(&self, source_type: &str) -> Result<String> {
        self.map(source_type).map(|m| m.target_type)
    }

    /// Map a source type, returning the target type and optional warning.
    pub fn convert_with_warning(&self, source_type: &str) -> Result<(String, Option<String>)> {
        self.map(source_type).map(|m| (m.target_type, m.warning))
    }
}

/// Trim, uppercase and collapse whitespace, dropping spaces inside parentheses
/// and around commas: `" decimal ( 10 , 2 ) "` becomes `"DECIMAL(10,2)"`.
pub fn normalize_type(source_type: &str) -> String {
    let collapsed = source_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();

    let mut out = String::with_capacity(collapsed.len());
    let mut chars = collapsed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ' ' {
            let next = chars.peek().copied();
            let prev = out.chars().last();
            if matches!(next, Some('(' | ')' | ','))
                || matches!(prev, Some('(' | ','))
            {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Whether a mapped type and a type observed in the target catalog name the
/// same PostgreSQL type, ignoring alias spellings.
pub fn types_equivalent(expected: &str, observed: &str) -> bool {
    canonical_pg_type(expected) == canonical_pg_type(observed)
}

/// Canonical spelling of a PostgreSQL type name.
fn canonical_pg_type(pg_type: &str) -> String {
    let normalized = normalize_type(pg_type);
    let normalized = normalized
        .strip_suffix(" WITHOUT TIME ZONE")
        .unwrap_or(&normalized);

    let (base, params) = match normalized.find('(') {
        Some(idx) => normalized.split_at(idx),
        None => (normalized, ""),
    };

    let base = match base {
        "CHARACTER VARYING" => "VARCHAR",
        "CHARACTER" | "BPCHAR" => "CHAR",
        "INT" | "INT4" => "INTEGER",
        "INT2" => "SMALLINT",
        "INT8" => "BIGINT",
        "FLOAT8" | "FLOAT" => "DOUBLE PRECISION",
        "FLOAT4" => "REAL",
        "BOOL" => "BOOLEAN",
        "DECIMAL" => "NUMERIC",
        other => other,
    };

    // Six fractional digits is PostgreSQL's default precision.
    if matches!(base, "TIMESTAMP" | "TIME") && params == "(6)" {
        return base.to_string();
    }
    format!("{}{}", base, params)
}
