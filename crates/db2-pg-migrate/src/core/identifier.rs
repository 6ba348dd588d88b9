//! Identifier validation and quoting.
//!
//! Identifiers cannot be bound as statement parameters, so every table,
//! column and schema name that ends up in generated SQL goes through here.
//! DB2 and PostgreSQL both use double-quoted delimited identifiers, and
//! quoting preserves the catalog case (DB2 stores unquoted names upper-case).

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted from a catalog.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// PostgreSQL truncates identifiers longer than this.
pub const PG_MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier read from a catalog.
///
/// Rejects empty identifiers, identifiers containing NUL bytes, and
/// identifiers longer than [`MAX_IDENTIFIER_LENGTH`] bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote an identifier with double quotes, doubling embedded quotes.
///
/// Valid for both DB2 and PostgreSQL.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a table name with its schema, quoting both parts.
pub fn qualify(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

/// Quote and join a column list.
pub fn quote_list(columns: &[String]) -> Result<String> {
    let quoted: Result<Vec<String>> = columns.iter().map(|c| quote_ident(c)).collect();
    Ok(quoted?.join(", "))
}

/// Split "SCHEMA.NAME" into its parts. A bare name yields an empty schema.
pub fn split_qualified(qualified: &str) -> (&str, &str) {
    match qualified.split_once('.') {
        Some((schema, name)) => (schema, name),
        None => ("", qualified),
    }
}

/// Reject check constraint bodies that could smuggle extra statements.
///
/// Catalog check definitions should be single boolean expressions.
pub fn validate_check_constraint(definition: &str) -> Result<()> {
    let upper = definition.to_uppercase();

    if definition.contains(';') {
        return Err(MigrateError::Config(format!(
            "Check constraint contains semicolon: {}",
            definition
        )));
    }
    if definition.contains("--") || definition.contains("/*") {
        return Err(MigrateError::Config(format!(
            "Check constraint contains comment: {}",
            definition
        )));
    }
    for keyword in ["EXECUTE ", "CALL ", "DROP ", "DELETE ", "INSERT ", "UPDATE "] {
        if upper.contains(keyword) {
            return Err(MigrateError::Config(format!(
                "Check constraint contains '{}': {}",
                keyword.trim(),
                definition
            )));
        }
    }

    Ok(())
}
