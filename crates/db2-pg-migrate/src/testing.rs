//! In-memory source and target used by the unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::identifier::split_qualified;
use crate::core::{
    Catalog, Row, RowCursor, SourceDatabase, SqlValue, TableDefinition, TargetColumn,
    TargetDatabase, TargetTransaction,
};
use crate::error::{MigrateError, Result};

/// Source backed by a catalog and per-table row vectors in key order.
#[derive(Default)]
pub(crate) struct MemorySource {
    catalog: Catalog,
    rows: Mutex<HashMap<String, Vec<Row>>>,
    cursor_opens: Mutex<Vec<(String, u64)>>,
}

impl MemorySource {
    pub(crate) fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            ..Default::default()
        }
    }

    pub(crate) fn with_rows(self, table: &str, rows: Vec<Row>) -> Self {
        self.set_rows(table, rows);
        self
    }

    pub(crate) fn set_rows(&self, table: &str, rows: Vec<Row>) {
        self.rows.lock().unwrap().insert(table.to_string(), rows);
    }

    /// `(table, start_offset)` of every cursor opened so far.
    pub(crate) fn cursor_opens(&self) -> Vec<(String, u64)> {
        self.cursor_opens.lock().unwrap().clone()
    }

    fn table_rows(&self, table: &TableDefinition) -> Result<Vec<Row>> {
        self.rows
            .lock()
            .unwrap()
            .get(&table.qualified_name())
            .cloned()
            .ok_or_else(|| MigrateError::Source(format!("no table {}", table.qualified_name())))
    }
}

struct MemoryCursor {
    rows: std::vec::IntoIter<Row>,
    batch_size: usize,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        let batch: Vec<Row> = self.rows.by_ref().take(self.batch_size).collect();
        Ok((!batch.is_empty()).then_some(batch))
    }
}

#[async_trait]
impl SourceDatabase for MemorySource {
    async fn extract_catalog(&self, _schema: &str) -> Result<Catalog> {
        Ok(self.catalog.clone())
    }

    async fn open_cursor(
        &self,
        table: &TableDefinition,
        _order_by: &[String],
        start_offset: u64,
        batch_size: usize,
    ) -> Result<Box<dyn RowCursor>> {
        self.cursor_opens
            .lock()
            .unwrap()
            .push((table.qualified_name(), start_offset));
        let rows: Vec<Row> = self
            .table_rows(table)?
            .into_iter()
            .skip(start_offset as usize)
            .collect();
        Ok(Box::new(MemoryCursor {
            rows: rows.into_iter(),
            batch_size,
        }))
    }

    async fn count_rows(&self, table: &TableDefinition) -> Result<u64> {
        Ok(self.table_rows(table)?.len() as u64)
    }

    async fn sample_rows(&self, table: &TableDefinition, n: usize) -> Result<Vec<Row>> {
        Ok(self.table_rows(table)?.into_iter().take(n).collect())
    }

    async fn execute(&self, _sql: &str) -> Result<()> {
        Ok(())
    }

    async fn query_scalar(&self, _sql: &str) -> Result<Option<SqlValue>> {
        Ok(None)
    }
}

#[derive(Default)]
struct MemTable {
    columns: Vec<TargetColumn>,
    rows: Vec<Row>,
}

#[derive(Default)]
struct TargetState {
    tables: BTreeMap<String, MemTable>,
    ddl: Vec<String>,
    failing_ddl: Vec<String>,
    fail_write_call: Option<usize>,
    write_calls: usize,
    commits: usize,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// Target that keeps tables in memory and stages writes per transaction.
///
/// `CREATE TABLE` statements rendered by the schema converter are parsed
/// for their column names and types.
#[derive(Clone, Default)]
pub(crate) struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pre-create a table, as for a data-only run.
    pub(crate) fn with_table(self, qualified: &str, columns: &[(&str, &str)]) -> Self {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| TargetColumn {
                name: name.to_string(),
                data_type: ty.to_string(),
                ordinal: i as u32 + 1,
            })
            .collect();
        self.state.lock().unwrap().tables.insert(
            qualified.to_string(),
            MemTable {
                columns,
                rows: Vec::new(),
            },
        );
        self
    }

    /// Fail every DDL statement containing `fragment`.
    pub(crate) fn fail_ddl_containing(&self, fragment: &str) {
        self.state.lock().unwrap().failing_ddl.push(fragment.to_string());
    }

    /// Fail the `n`th bulk write (1-based) after staging half its rows.
    pub(crate) fn fail_write_call(&self, n: usize) {
        self.state.lock().unwrap().fail_write_call = Some(n);
    }

    /// Cancel `token` once `commits` transactions have committed.
    pub(crate) fn cancel_after_commits(&self, commits: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((commits, token));
    }

    pub(crate) fn rows(&self, qualified: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(qualified)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_rows(&self, qualified: &str, rows: Vec<Row>) {
        if let Some(t) = self.state.lock().unwrap().tables.get_mut(qualified) {
            t.rows = rows;
        }
    }

    pub(crate) fn ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().ddl.clone()
    }

    pub(crate) fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.state.lock().unwrap().write_calls
    }

    pub(crate) fn has_table(&self, qualified: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(qualified)
    }
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}

/// Table key and columns of a rendered `CREATE TABLE`.
fn parse_create_table(sql: &str) -> Option<(String, Vec<TargetColumn>)> {
    let rest = sql.strip_prefix("CREATE TABLE ")?;
    let (name, body) = rest.split_once(" (")?;
    let (schema, table) = split_qualified(name);
    let key = format!("{}.{}", unquote(schema), unquote(table));

    let mut columns = Vec::new();
    for line in body.lines() {
        let line = line.trim().trim_end_matches(',');
        let Some(after_quote) = line.strip_prefix('"') else {
            continue;
        };
        let Some((col, ty)) = after_quote.split_once("\" ") else {
            continue;
        };
        let ty = [" GENERATED", " DEFAULT", " NOT NULL"]
            .iter()
            .filter_map(|marker| ty.find(marker))
            .min()
            .map_or(ty, |idx| &ty[..idx]);
        columns.push(TargetColumn {
            name: col.to_string(),
            data_type: ty.to_string(),
            ordinal: columns.len() as u32 + 1,
        });
    }
    Some((key, columns))
}

struct MemoryTransaction {
    state: Arc<Mutex<TargetState>>,
    staged: Vec<(String, Vec<Row>)>,
}

#[async_trait]
impl TargetTransaction for MemoryTransaction {
    async fn bulk_write(
        &mut self,
        schema: &str,
        table: &str,
        _columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let key = format!("{}.{}", schema, table);
        let mut state = self.state.lock().unwrap();
        state.write_calls += 1;
        if !state.tables.contains_key(&key) {
            return Err(MigrateError::TargetStatement(format!(
                "relation {} does not exist",
                key
            )));
        }
        if state.fail_write_call == Some(state.write_calls) {
            self.staged.push((key, rows[..rows.len() / 2].to_vec()));
            return Err(MigrateError::TargetStatement(
                "simulated write failure".to_string(),
            ));
        }
        self.staged.push((key, rows.to_vec()));
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for (key, rows) in self.staged {
            if let Some(t) = state.tables.get_mut(&key) {
                t.rows.extend(rows);
            }
        }
        state.commits += 1;
        let commits = state.commits;
        if let Some((after, token)) = &state.cancel_after {
            if commits >= *after {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TargetDatabase for MemoryTarget {
    async fn execute_ddl(&self, statement: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_ddl.iter().any(|f| statement.contains(f.as_str())) {
            return Err(MigrateError::TargetStatement(format!(
                "simulated DDL failure: {}",
                statement
            )));
        }
        state.ddl.push(statement.to_string());
        if let Some((key, columns)) = parse_create_table(statement) {
            state.tables.insert(
                key,
                MemTable {
                    columns,
                    rows: Vec::new(),
                },
            );
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            staged: Vec::new(),
        }))
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64> {
        let key = format!("{}.{}", schema, table);
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&key)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| MigrateError::TargetStatement(format!("relation {} does not exist", key)))
    }

    async fn describe_table(&self, schema: &str, table: &str) -> Result<Option<Vec<TargetColumn>>> {
        let key = format!("{}.{}", schema, table);
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .get(&key)
            .map(|t| t.columns.clone()))
    }

    async fn fetch_row_by_key(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        key: &[SqlValue],
    ) -> Result<Option<Row>> {
        let qualified = format!("{}.{}", schema, table);
        let state = self.state.lock().unwrap();
        let Some(t) = state.tables.get(&qualified) else {
            return Ok(None);
        };
        let position = |name: &String| t.columns.iter().position(|c| &c.name == name);
        let key_idx: Vec<usize> = key_columns.iter().filter_map(position).collect();
        let col_idx: Vec<usize> = columns.iter().filter_map(position).collect();

        Ok(t.rows
            .iter()
            .find(|row| key_idx.iter().zip(key).all(|(&i, k)| row.get(i) == Some(k)))
            .map(|row| col_idx.iter().map(|&i| row[i].clone()).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_table() {
        let sql = "CREATE TABLE \"public\".\"ORDERS\" (\n    \"ID\" INTEGER GENERATED BY DEFAULT AS IDENTITY NOT NULL,\n    \"AMOUNT\" NUMERIC(10,2) DEFAULT 0,\n    \"NOTE\" VARCHAR(20),\n    PRIMARY KEY (\"ID\")\n)";
        let (key, cols) = parse_create_table(sql).unwrap();
        assert_eq!(key, "public.ORDERS");
        let types: Vec<&str> = cols.iter().map(|c| c.data_type.as_str()).collect();
        assert_eq!(types, vec!["INTEGER", "NUMERIC(10,2)", "VARCHAR(20)"]);
    }
}
