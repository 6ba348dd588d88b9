//! Database seams consumed by the migration engine.
//!
//! - [`SourceDatabase`]: reads catalog metadata and rows from DB2
//! - [`TargetDatabase`]: runs DDL and transactional bulk writes on PostgreSQL
//! - [`RowCursor`]: forward-only batched read over one table
//!
//! The engine only talks to these traits, so the core logic is exercised in
//! tests with in-memory implementations.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{Catalog, TableDefinition};
use super::value::{Row, SqlValue};

/// Forward-only, batched read over a table in a stable order.
#[async_trait]
pub trait RowCursor: Send {
    /// Next chunk of at most `batch_size` rows, or `None` once exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>>;
}

/// Source database handle.
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Read every table, view, sequence, routine and trigger in `schema`.
    async fn extract_catalog(&self, schema: &str) -> Result<Catalog>;

    /// Open a cursor over `table` ordered by `order_by` (physical order when
    /// empty), skipping the first `start_offset` rows.
    ///
    /// Rows carry the table's columns in ordinal order.
    async fn open_cursor(
        &self,
        table: &TableDefinition,
        order_by: &[String],
        start_offset: u64,
        batch_size: usize,
    ) -> Result<Box<dyn RowCursor>>;

    /// `SELECT COUNT(*)` on the table.
    async fn count_rows(&self, table: &TableDefinition) -> Result<u64>;

    /// Up to `n` rows chosen uniformly at random, columns in ordinal order.
    async fn sample_rows(&self, table: &TableDefinition, n: usize) -> Result<Vec<Row>>;

    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a query and return the first column of the first row.
    async fn query_scalar(&self, sql: &str) -> Result<Option<SqlValue>>;
}

/// Column as observed in the target catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetColumn {
    pub name: String,

    /// Formatted type, e.g. "numeric(10,2)" or "character varying(100)".
    pub data_type: String,

    /// Ordinal position (1-based).
    pub ordinal: u32,
}

/// An open target-side transaction.
#[async_trait]
pub trait TargetTransaction: Send {
    /// Insert `rows` into `schema.table`; returns rows written.
    async fn bulk_write(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Target database handle.
#[async_trait]
pub trait TargetDatabase: Send + Sync {
    /// Run one DDL statement in its own implicit transaction.
    async fn execute_ddl(&self, statement: &str) -> Result<()>;

    /// Start a transaction for a batch write.
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>>;

    /// `SELECT COUNT(*)` on the table.
    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64>;

    /// Columns of the table, or `None` when it does not exist.
    async fn describe_table(&self, schema: &str, table: &str) -> Result<Option<Vec<TargetColumn>>>;

    /// Look up one row by key. `columns` selects and orders the returned values.
    async fn fetch_row_by_key(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        key: &[SqlValue],
    ) -> Result<Option<Row>>;
}
