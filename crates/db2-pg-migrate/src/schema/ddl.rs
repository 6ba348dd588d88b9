//! PostgreSQL DDL rendering for tables, constraints, indexes and sequences.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::identifier::{qualify, quote_ident, quote_list, validate_check_constraint};
use crate::core::{ForeignKey, IndexDefinition, SequenceDefinition, TableDefinition};
use crate::error::{MigrateError, Result};
use crate::typemap::normalize_type;

use super::MappedColumn;

/// `CREATE TABLE` plus inline primary key and unique constraints, followed by
/// one `ALTER TABLE ... CHECK` per check constraint.
pub fn render_create_table(
    table: &TableDefinition,
    columns: &[MappedColumn],
    target_schema: &str,
) -> Result<(Vec<String>, Vec<String>)> {
    let qualified = qualify(target_schema, &table.name)?;
    let mut warnings = Vec::new();
    let mut lines = Vec::with_capacity(columns.len() + 1);

    for (col, mapped) in table.columns.iter().zip(columns) {
        let mut line = format!("    {} ", quote_ident(&col.name)?);

        if col.is_identity {
            let identity_type = identity_type(&mapped.target_type);
            if identity_type != mapped.target_type {
                warnings.push(format!(
                    "{}.{}: identity column of type {} created as {}",
                    table.qualified_name(),
                    col.name,
                    mapped.target_type,
                    identity_type
                ));
            }
            line.push_str(identity_type);
            line.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        } else {
            line.push_str(&mapped.target_type);
            if let Some(default) = &col.default {
                line.push_str(" DEFAULT ");
                line.push_str(&convert_default(default));
            }
        }

        if !col.nullable {
            line.push_str(" NOT NULL");
        }
        lines.push(line);
    }

    if table.has_pk() {
        lines.push(format!("    PRIMARY KEY ({})", quote_list(&table.primary_key)?));
    }
    for unique in &table.unique_constraints {
        lines.push(format!(
            "    CONSTRAINT {} UNIQUE ({})",
            quote_ident(&unique.name)?,
            quote_list(&unique.columns)?
        ));
    }

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n{}\n)",
        qualified,
        lines.join(",\n")
    )];

    for check in &table.check_constraints {
        let expression = convert_expression(&check.definition);
        if let Err(e) = validate_check_constraint(&expression) {
            warnings.push(format!(
                "{}: check constraint {} skipped: {}",
                table.qualified_name(),
                check.name,
                e
            ));
            continue;
        }
        statements.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})",
            qualified,
            quote_ident(&check.name)?,
            expression
        ));
    }

    Ok((statements, warnings))
}

/// PostgreSQL identity columns must be smallint, integer or bigint.
fn identity_type(target_type: &str) -> &'static str {
    match normalize_type(target_type).as_str() {
        "SMALLINT" => "SMALLINT",
        "INTEGER" => "INTEGER",
        _ => "BIGINT",
    }
}

/// `ALTER TABLE child ADD CONSTRAINT ... FOREIGN KEY ... REFERENCES parent`.
///
/// The referenced table is assumed to live in the same target schema.
pub fn render_foreign_key(
    table: &TableDefinition,
    fk: &ForeignKey,
    target_schema: &str,
) -> Result<String> {
    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        qualify(target_schema, &table.name)?,
        quote_ident(&fk.name)?,
        quote_list(&fk.columns)?,
        qualify(target_schema, &fk.ref_table)?,
        quote_list(&fk.ref_columns)?
    );
    if let Some(action) = referential_action(&fk.on_delete) {
        sql.push_str(" ON DELETE ");
        sql.push_str(action);
    }
    if let Some(action) = referential_action(&fk.on_update) {
        sql.push_str(" ON UPDATE ");
        sql.push_str(action);
    }
    Ok(sql)
}

/// Map a DB2 delete/update rule to a PostgreSQL action. `NO ACTION` is the
/// default on both sides and is left out.
fn referential_action(rule: &str) -> Option<&'static str> {
    match rule.trim().to_uppercase().as_str() {
        "CASCADE" | "C" => Some("CASCADE"),
        "SET NULL" | "N" => Some("SET NULL"),
        "RESTRICT" | "R" => Some("RESTRICT"),
        _ => None,
    }
}

/// `CREATE [UNIQUE] INDEX name ON table (col [DESC], ...)`.
pub fn render_index(
    table: &TableDefinition,
    index: &IndexDefinition,
    target_schema: &str,
) -> Result<String> {
    let keys = index
        .columns
        .iter()
        .map(|column| {
            let ident = quote_ident(column)?;
            Ok(if index.descending.contains(column) {
                format!("{} DESC", ident)
            } else {
                ident
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.is_unique { "UNIQUE " } else { "" },
        quote_ident(&index.name)?,
        qualify(target_schema, &table.name)?,
        keys.join(", ")
    ))
}

/// `CREATE SEQUENCE` continuing from where the source left off.
pub fn render_sequence(seq: &SequenceDefinition, target_schema: &str) -> Result<String> {
    let mut sql = format!(
        "CREATE SEQUENCE {} START WITH {} INCREMENT BY {}",
        qualify(target_schema, &seq.name)?,
        seq.next_value.unwrap_or(seq.start),
        seq.increment
    );
    match seq.min_value {
        Some(min) => sql.push_str(&format!(" MINVALUE {}", min)),
        None => sql.push_str(" NO MINVALUE"),
    }
    match seq.max_value {
        Some(max) => sql.push_str(&format!(" MAXVALUE {}", max)),
        None => sql.push_str(" NO MAXVALUE"),
    }
    if let Some(cache) = seq.cache.filter(|c| *c > 1) {
        sql.push_str(&format!(" CACHE {}", cache));
    }
    sql.push_str(if seq.cycle { " CYCLE" } else { " NO CYCLE" });
    Ok(sql)
}

/// Move each identity sequence past the highest migrated value.
pub fn render_identity_sync(table: &TableDefinition, target_schema: &str) -> Result<Vec<String>> {
    let qualified = qualify(target_schema, &table.name)?;
    table
        .columns
        .iter()
        .filter(|c| c.is_identity)
        .map(|col| {
            let column = quote_ident(&col.name)?;
            Ok(format!(
                "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
                qualified.replace('\'', "''"),
                col.name.replace('\'', "''"),
                column,
                qualified
            ))
        })
        .collect()
}

/// Translate a DB2 column default into PostgreSQL syntax.
pub fn convert_default(default: &str) -> String {
    let trimmed = default.trim();
    match normalize_type(trimmed).as_str() {
        "USER" | "CURRENT USER" => return "CURRENT_USER".to_string(),
        "CURRENT SCHEMA" | "CURRENT_SCHEMA" => return "CURRENT_SCHEMA".to_string(),
        "CURRENT TIMEZONE" => return "CURRENT_TIMESTAMP".to_string(),
        "NULL" => return "NULL".to_string(),
        _ => {}
    }
    convert_expression(trimmed)
}

static EXPRESSION_REWRITES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bCURRENT\s+TIMESTAMP\b", "CURRENT_TIMESTAMP"),
        (r"(?i)\bCURRENT\s+TIMEZONE\b", "CURRENT_TIMESTAMP"),
        (r"(?i)\bCURRENT\s+DATE\b", "CURRENT_DATE"),
        (r"(?i)\bCURRENT\s+TIME\b", "CURRENT_TIME"),
        (r"(?i)\bCURRENT\s+SCHEMA\b", "CURRENT_SCHEMA"),
        (r"(?i)\bCURRENT\s+USER\b", "CURRENT_USER"),
        (r"(?i)\bVALUE\s*\(", "COALESCE("),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("Invalid regex"), replacement))
    .collect()
});

/// Rewrite DB2 special registers and scalar functions inside an SQL expression.
pub fn convert_expression(expression: &str) -> String {
    EXPRESSION_REWRITES
        .iter()
        .fold(expression.to_string(), |acc, (pattern, replacement)| {
            pattern.replace_all(&acc, *replacement).into_owned()
        })
}

/// Replace references to `source_schema.` with `target_schema.` in SQL text,
/// quoted or not.
pub fn retarget_schema(sql: &str, source_schema: &str, target_schema: &str) -> Result<String> {
    if source_schema.is_empty() || source_schema == target_schema {
        return Ok(sql.to_string());
    }
    let pattern = format!(
        r#"(?i)(?:"{}"|\b{}\b)\s*\."#,
        regex::escape(source_schema),
        regex::escape(source_schema)
    );
    let re = Regex::new(&pattern)
        .map_err(|e| MigrateError::Config(format!("bad schema name {}: {}", source_schema, e)))?;
    let replacement = format!("{}.", quote_ident(target_schema)?);
    Ok(re
        .replace_all(sql, regex::NoExpand(&replacement))
        .into_owned())
}
