//! DB2 catalog extraction from the SYSCAT views.
//!
//! Every query filters on a single schema and returns text columns; the
//! rows are assembled into [`Catalog`] types here. Parsing of the packed
//! column lists DB2 keeps in SYSCAT (`FK_COLNAMES`, index `COLNAMES`) lives
//! in small pure functions so it can be tested without a database.

use odbc_api::Connection;
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::value::escape_sql_string;
use crate::core::{
    Catalog, CheckConstraint, ColumnDefinition, ForeignKey, IndexDefinition, ParamDirection,
    Parameter, ProcedureDefinition, RoutineKind, SequenceDefinition, TableDefinition,
    TriggerDefinition, UniqueConstraint, ViewDefinition,
};
use crate::error::Result;

use super::{query_text, TextRow};

/// Read every supported object of `schema`.
pub(super) fn extract(conn: &Connection<'_>, schema: &str) -> Result<Catalog> {
    let lit = escape_sql_string(schema);

    let mut tables: BTreeMap<String, TableDefinition> = BTreeMap::new();
    for row in query_text(
        conn,
        &format!(
            "SELECT TABNAME FROM SYSCAT.TABLES WHERE TABSCHEMA = '{lit}' AND TYPE = 'T' ORDER BY TABNAME"
        ),
    )? {
        let name = text(&row, 0);
        tables.insert(name.clone(), TableDefinition::new(schema, name));
    }

    load_columns(conn, &lit, &mut tables)?;
    load_key_constraints(conn, &lit, &mut tables)?;
    load_checks(conn, &lit, &mut tables)?;
    load_foreign_keys(conn, &lit, &mut tables)?;
    load_indexes(conn, &lit, &mut tables)?;

    let catalog = Catalog {
        tables: tables.into_values().collect(),
        views: load_views(conn, schema, &lit)?,
        sequences: load_sequences(conn, schema, &lit)?,
        procedures: load_routines(conn, schema, &lit)?,
        triggers: load_triggers(conn, schema, &lit)?,
    };
    debug!(
        "SYSCAT extraction for {}: {} tables, {} views, {} sequences, {} routines, {} triggers",
        schema,
        catalog.tables.len(),
        catalog.views.len(),
        catalog.sequences.len(),
        catalog.procedures.len(),
        catalog.triggers.len()
    );
    Ok(catalog)
}

fn load_columns(
    conn: &Connection<'_>,
    lit: &str,
    tables: &mut BTreeMap<String, TableDefinition>,
) -> Result<()> {
    let sql = format!(
        "SELECT TABNAME, COLNAME, TYPENAME, LENGTH, SCALE, CODEPAGE, NULLS, DEFAULT, IDENTITY, COLNO \
         FROM SYSCAT.COLUMNS WHERE TABSCHEMA = '{lit}' ORDER BY TABNAME, COLNO"
    );
    for row in query_text(conn, &sql)? {
        let Some(table) = tables.get_mut(&text(&row, 0)) else {
            continue;
        };
        let source_type = column_type(
            &text(&row, 2),
            number(&row, 3).unwrap_or(0),
            number(&row, 4).unwrap_or(0),
            number(&row, 5).unwrap_or(1),
        );
        let ordinal = number(&row, 9).map(|n| n + 1).unwrap_or(table.columns.len() as i64 + 1);
        let mut column = ColumnDefinition::new(text(&row, 1), source_type, ordinal as u32);
        if flag(&row, 6) == "N" {
            column = column.not_null();
        }
        if let Some(default) = opt_text(&row, 7).filter(|d| !d.trim().is_empty()) {
            column = column.with_default(default.trim());
        }
        if flag(&row, 8) == "Y" {
            column = column.identity();
        }
        table.columns.push(column);
    }
    Ok(())
}

fn load_key_constraints(
    conn: &Connection<'_>,
    lit: &str,
    tables: &mut BTreeMap<String, TableDefinition>,
) -> Result<()> {
    let sql = format!(
        "SELECT c.TABNAME, c.CONSTNAME, c.TYPE, k.COLNAME \
         FROM SYSCAT.TABCONST c \
         JOIN SYSCAT.KEYCOLUSE k \
           ON k.CONSTNAME = c.CONSTNAME AND k.TABSCHEMA = c.TABSCHEMA AND k.TABNAME = c.TABNAME \
         WHERE c.TABSCHEMA = '{lit}' AND c.TYPE IN ('P', 'U') \
         ORDER BY c.TABNAME, c.CONSTNAME, k.COLSEQ"
    );
    for row in query_text(conn, &sql)? {
        let Some(table) = tables.get_mut(&text(&row, 0)) else {
            continue;
        };
        let constraint = text(&row, 1);
        let column = text(&row, 3);
        if flag(&row, 2) == "P" {
            table.primary_key.push(column);
            continue;
        }
        match table
            .unique_constraints
            .iter_mut()
            .find(|u| u.name == constraint)
        {
            Some(unique) => unique.columns.push(column),
            None => table.unique_constraints.push(UniqueConstraint {
                name: constraint,
                columns: vec![column],
            }),
        }
    }
    Ok(())
}

fn load_checks(
    conn: &Connection<'_>,
    lit: &str,
    tables: &mut BTreeMap<String, TableDefinition>,
) -> Result<()> {
    let sql = format!(
        "SELECT TABNAME, CONSTNAME, TEXT FROM SYSCAT.CHECKS \
         WHERE TABSCHEMA = '{lit}' AND TYPE = 'C' ORDER BY TABNAME, CONSTNAME"
    );
    for row in query_text(conn, &sql)? {
        if let Some(table) = tables.get_mut(&text(&row, 0)) {
            table.check_constraints.push(CheckConstraint {
                name: text(&row, 1),
                definition: text(&row, 2),
            });
        }
    }
    Ok(())
}

fn load_foreign_keys(
    conn: &Connection<'_>,
    lit: &str,
    tables: &mut BTreeMap<String, TableDefinition>,
) -> Result<()> {
    let sql = format!(
        "SELECT TABNAME, CONSTNAME, FK_COLNAMES, REFTABSCHEMA, REFTABNAME, PK_COLNAMES, DELETERULE, UPDATERULE \
         FROM SYSCAT.REFERENCES WHERE TABSCHEMA = '{lit}' ORDER BY TABNAME, CONSTNAME"
    );
    for row in query_text(conn, &sql)? {
        if let Some(table) = tables.get_mut(&text(&row, 0)) {
            table.foreign_keys.push(ForeignKey {
                name: text(&row, 1),
                columns: split_colnames(&text(&row, 2)),
                ref_schema: text(&row, 3).trim().to_string(),
                ref_table: text(&row, 4),
                ref_columns: split_colnames(&text(&row, 5)),
                on_delete: referential_action(&flag(&row, 6)).to_string(),
                on_update: referential_action(&flag(&row, 7)).to_string(),
            });
        }
    }
    Ok(())
}

fn load_indexes(
    conn: &Connection<'_>,
    lit: &str,
    tables: &mut BTreeMap<String, TableDefinition>,
) -> Result<()> {
    let sql = format!(
        "SELECT TABNAME, INDNAME, UNIQUERULE, COLNAMES FROM SYSCAT.INDEXES \
         WHERE TABSCHEMA = '{lit}' AND UNIQUERULE <> 'P' ORDER BY TABNAME, INDNAME"
    );
    for row in query_text(conn, &sql)? {
        let Some(table) = tables.get_mut(&text(&row, 0)) else {
            continue;
        };
        let keys = split_index_colnames(&text(&row, 3));
        let columns: Vec<String> = keys.iter().map(|(name, _)| name.clone()).collect();
        // Unique constraints already create their own index.
        if table.unique_constraints.iter().any(|u| u.columns == columns) {
            continue;
        }
        let descending = keys
            .into_iter()
            .filter(|(_, desc)| *desc)
            .map(|(name, _)| name)
            .collect();
        table.indexes.push(IndexDefinition {
            name: text(&row, 1),
            columns,
            descending,
            is_unique: flag(&row, 2) == "U",
        });
    }
    Ok(())
}

fn load_views(conn: &Connection<'_>, schema: &str, lit: &str) -> Result<Vec<ViewDefinition>> {
    let mut references: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let deps = format!(
        "SELECT VIEWNAME, BSCHEMA, BNAME FROM SYSCAT.VIEWDEP \
         WHERE VIEWSCHEMA = '{lit}' AND BTYPE IN ('T', 'V') ORDER BY VIEWNAME, BNAME"
    );
    for row in query_text(conn, &deps)? {
        let qualified = format!("{}.{}", text(&row, 1).trim(), text(&row, 2));
        let entry = references.entry(text(&row, 0)).or_default();
        if !entry.contains(&qualified) {
            entry.push(qualified);
        }
    }

    let sql = format!(
        "SELECT VIEWNAME, TEXT FROM SYSCAT.VIEWS WHERE VIEWSCHEMA = '{lit}' ORDER BY VIEWNAME"
    );
    Ok(query_text(conn, &sql)?
        .into_iter()
        .map(|row| {
            let name = text(&row, 0);
            ViewDefinition {
                schema: schema.to_string(),
                references: references.remove(&name).unwrap_or_default(),
                definition: text(&row, 1),
                name,
            }
        })
        .collect())
}

fn load_sequences(
    conn: &Connection<'_>,
    schema: &str,
    lit: &str,
) -> Result<Vec<SequenceDefinition>> {
    let sql = format!(
        "SELECT SEQNAME, START, INCREMENT, MINVALUE, MAXVALUE, CYCLE, CACHE, NEXTCACHEFIRSTVALUE \
         FROM SYSCAT.SEQUENCES WHERE SEQSCHEMA = '{lit}' AND SEQTYPE = 'S' ORDER BY SEQNAME"
    );
    Ok(query_text(conn, &sql)?
        .into_iter()
        .map(|row| SequenceDefinition {
            schema: schema.to_string(),
            name: text(&row, 0),
            start: number(&row, 1).unwrap_or(1),
            increment: number(&row, 2).unwrap_or(1),
            min_value: number(&row, 3),
            max_value: number(&row, 4),
            cycle: flag(&row, 5) == "Y",
            cache: number(&row, 6).filter(|c| *c > 1),
            next_value: number(&row, 7),
        })
        .collect())
}

fn load_routines(
    conn: &Connection<'_>,
    schema: &str,
    lit: &str,
) -> Result<Vec<ProcedureDefinition>> {
    let mut parameters: BTreeMap<String, Vec<Parameter>> = BTreeMap::new();
    let parms = format!(
        "SELECT SPECIFICNAME, PARMNAME, TYPENAME, LENGTH, SCALE, ROWTYPE FROM SYSCAT.ROUTINEPARMS \
         WHERE ROUTINESCHEMA = '{lit}' AND ROWTYPE IN ('P', 'O', 'B') ORDER BY SPECIFICNAME, ORDINAL"
    );
    for row in query_text(conn, &parms)? {
        let direction = match flag(&row, 5).as_str() {
            "O" => ParamDirection::Out,
            "B" => ParamDirection::InOut,
            _ => ParamDirection::In,
        };
        parameters.entry(text(&row, 0)).or_default().push(Parameter {
            name: text(&row, 1),
            source_type: column_type(
                &text(&row, 2),
                number(&row, 3).unwrap_or(0),
                number(&row, 4).unwrap_or(0),
                1,
            ),
            direction,
        });
    }

    let sql = format!(
        "SELECT ROUTINENAME, SPECIFICNAME, ROUTINETYPE, TEXT FROM SYSCAT.ROUTINES \
         WHERE ROUTINESCHEMA = '{lit}' AND ROUTINETYPE IN ('P', 'F') AND ORIGIN = 'Q' \
         ORDER BY ROUTINENAME, SPECIFICNAME"
    );
    Ok(query_text(conn, &sql)?
        .into_iter()
        .map(|row| ProcedureDefinition {
            schema: schema.to_string(),
            name: text(&row, 0),
            kind: if flag(&row, 2) == "F" {
                RoutineKind::Function
            } else {
                RoutineKind::Procedure
            },
            definition: text(&row, 3),
            parameters: parameters.remove(&text(&row, 1)).unwrap_or_default(),
        })
        .collect())
}

fn load_triggers(
    conn: &Connection<'_>,
    schema: &str,
    lit: &str,
) -> Result<Vec<TriggerDefinition>> {
    let sql = format!(
        "SELECT TRIGNAME, TABSCHEMA, TABNAME, TEXT FROM SYSCAT.TRIGGERS \
         WHERE TRIGSCHEMA = '{lit}' ORDER BY TRIGNAME"
    );
    Ok(query_text(conn, &sql)?
        .into_iter()
        .map(|row| TriggerDefinition {
            schema: schema.to_string(),
            name: text(&row, 0),
            table: format!("{}.{}", text(&row, 1).trim(), text(&row, 2)),
            definition: text(&row, 3),
        })
        .collect())
}

fn opt_text(row: &TextRow, idx: usize) -> Option<String> {
    row.get(idx).cloned().flatten()
}

fn text(row: &TextRow, idx: usize) -> String {
    opt_text(row, idx).unwrap_or_default()
}

fn flag(row: &TextRow, idx: usize) -> String {
    text(row, idx).trim().to_ascii_uppercase()
}

fn number(row: &TextRow, idx: usize) -> Option<i64> {
    let raw = opt_text(row, idx)?;
    let trimmed = raw.trim();
    // SEQUENCES stores bounds as DECIMAL(31,0), rendered with a trailing point.
    let digits = trimmed.strip_suffix('.').unwrap_or(trimmed);
    digits.parse().ok()
}

/// Render a SYSCAT column type the way DB2 DDL spells it.
///
/// `codepage` 0 marks character data stored `FOR BIT DATA`.
pub(crate) fn column_type(typename: &str, length: i64, scale: i64, codepage: i64) -> String {
    let base = typename.trim().to_ascii_uppercase();
    let bit_data = if codepage == 0 { " FOR BIT DATA" } else { "" };
    match base.as_str() {
        "CHARACTER" | "CHAR" => format!("CHAR({}){}", length, bit_data),
        "VARCHAR" => format!("VARCHAR({}){}", length, bit_data),
        "LONG VARCHAR" => format!("LONG VARCHAR{}", bit_data),
        "GRAPHIC" | "VARGRAPHIC" => format!("{}({})", base, length),
        "DECIMAL" | "NUMERIC" => format!("DECIMAL({},{})", length, scale),
        "TIMESTAMP" if scale != 6 => format!("TIMESTAMP({})", scale),
        "DECFLOAT" => format!("DECFLOAT({})", if length == 8 { 16 } else { 34 }),
        "BINARY" | "VARBINARY" => format!("{}({})", base, length),
        _ => base,
    }
}

/// Split a `FK_COLNAMES`/`PK_COLNAMES` value: names separated by blanks.
pub(crate) fn split_colnames(packed: &str) -> Vec<String> {
    packed.split_whitespace().map(str::to_string).collect()
}

/// Split an index `COLNAMES` value such as `+LAST_NAME-CREATED`, where each
/// name carries a sort-order prefix (`-` descending). Returns the names with
/// a descending flag.
pub(crate) fn split_index_colnames(packed: &str) -> Vec<(String, bool)> {
    let mut keys: Vec<(String, bool)> = Vec::new();
    for ch in packed.chars() {
        match ch {
            '+' | '-' | '*' => keys.push((String::new(), ch == '-')),
            _ => match keys.last_mut() {
                Some((name, _)) => name.push(ch),
                None => keys.push((ch.to_string(), false)),
            },
        }
    }
    keys.into_iter()
        .map(|(name, desc)| (name.trim().to_string(), desc))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Map a SYSCAT referential rule code to SQL.
pub(crate) fn referential_action(code: &str) -> &'static str {
    match code {
        "C" => "CASCADE",
        "N" => "SET NULL",
        "R" => "RESTRICT",
        _ => "NO ACTION",
    }
}
